//! Point-in-time reconstruction from the change log.
//!
//! Pure functions over `(item snapshot, unsorted change log, timestamp)` —
//! no I/O, so everything here is unit-testable without a store. The log is
//! the single source of truth for any field whose history matters; the
//! item's live fields only answer "what is the latest state".
//!
//! Known limitation: [`status_as_of`] falls back to the *current* status
//! when no status entry predates the target instant. For items created by
//! the engine this is exact (items start in their creation column and every
//! later transition is logged), but for items imported without a synthetic
//! initial entry it can misattribute status for dates before the first
//! recorded transition.

use chrono::{DateTime, Utc};

use crate::changelog::{ChangeEntry, fields};
use crate::model::WorkItem;

/// The latest entry for `field` with `at <= instant`, after sorting the
/// log by time (storage order is not trusted). `None` means the field has
/// no recorded value as of that instant — the caller decides the fallback.
#[must_use]
pub fn field_value_as_of<'a>(
    entries: &'a [ChangeEntry],
    field: &str,
    instant: DateTime<Utc>,
) -> Option<&'a ChangeEntry> {
    let mut surviving: Vec<&ChangeEntry> = entries
        .iter()
        .filter(|e| e.field == field && e.at <= instant)
        .collect();
    surviving.sort_by_key(|e| e.at);
    surviving.last().copied()
}

/// Whether the item belonged to `sprint_id` as of `instant`.
///
/// The current `sprint_id` field is believed only when no later-than-
/// `instant` entry shows the item being (re)assigned to that same sprint —
/// such an entry means the current membership began *after* the instant.
/// In every other case the most recent `sprint` entry at or before the
/// instant decides.
#[must_use]
pub fn was_member_of_sprint_as_of(
    item: &WorkItem,
    entries: &[ChangeEntry],
    sprint_id: &str,
    instant: DateTime<Utc>,
) -> bool {
    let assigned_later = entries.iter().any(|e| {
        e.field == fields::SPRINT
            && e.at > instant
            && e.new_value.as_deref() == Some(sprint_id)
    });

    if item.sprint_id.as_deref() == Some(sprint_id) && !assigned_later {
        return true;
    }

    field_value_as_of(entries, fields::SPRINT, instant)
        .is_some_and(|e| e.new_value.as_deref() == Some(sprint_id))
}

/// The item's status as of `instant`, as the raw stored string.
///
/// Raw rather than parsed so consumers can bucket statuses outside the
/// core column set (imported logs may carry values like `in-review`).
/// Falls back to the current status when no entry predates the instant —
/// see the module-level limitation note.
#[must_use]
pub fn status_as_of<'a>(
    item: &'a WorkItem,
    entries: &'a [ChangeEntry],
    instant: DateTime<Utc>,
) -> &'a str {
    field_value_as_of(entries, fields::STATUS, instant)
        .and_then(|e| e.new_value.as_deref())
        .unwrap_or_else(|| item.status.as_str())
}
