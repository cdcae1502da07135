//! Append-only change log.
//!
//! Every mutation the engine applies to a work item appends one
//! [`ChangeEntry`] per touched field, in the same transaction as the field
//! write. Entries are never mutated or deleted; they are the sole source
//! of historical truth. The live item fields are merely a cache of
//! "latest" — any as-of-date question goes through [`crate::history`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field names used in change entries.
///
/// The reconstructor keys on `STATUS` and `SPRINT`; the rest exist for the
/// audit trail.
pub mod fields {
    pub const CREATED: &str = "created";
    pub const DELETED: &str = "deleted";
    pub const STATUS: &str = "status";
    pub const SPRINT: &str = "sprint";
    pub const RANK: &str = "rank";
    pub const RESOLUTION: &str = "resolution";
    pub const EPIC: &str = "epic";
    pub const PARENT: &str = "parent";
    pub const LINK: &str = "link";
    pub const UNLINK: &str = "unlink";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const PRIORITY: &str = "priority";
    pub const STORY_POINTS: &str = "story-points";
    pub const DUE_DATE: &str = "due-date";
    pub const ASSIGNEE: &str = "assignee";
    pub const LABELS: &str = "labels";
}

/// One field transition on a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub item_id: String,
    /// Name of the mutated attribute, e.g. `status`, `sprint`.
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    pub at: DateTime<Utc>,
}

impl ChangeEntry {
    /// Build an entry for a field transition.
    #[must_use]
    pub fn new(
        item_id: impl Into<String>,
        field: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        actor: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            field: field.to_string(),
            old_value,
            new_value,
            actor: actor.into(),
            at,
        }
    }
}

/// Sort entries ascending by timestamp, preserving insertion order for
/// ties. Storage makes no ordering promise, so every consumer sorts first.
pub fn sort_by_time(entries: &mut [ChangeEntry]) {
    entries.sort_by_key(|e| e.at);
}
