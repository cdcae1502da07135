use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::rank::Rank;

/// The five kinds of work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Task,
    Bug,
    Story,
    Epic,
    Subtask,
}

impl ItemType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Story => "story",
            Self::Epic => "epic",
            Self::Subtask => "subtask",
        }
    }
}

/// The four status columns, in board order.
///
/// `Done` is the terminal column: entering it is gated on outstanding
/// reviews and triggers resolution automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Backlog,
    Todo,
    InProgress,
    Done,
}

impl Status {
    /// All columns in board order.
    pub const ALL: [Self; 4] = [Self::Backlog, Self::Todo, Self::InProgress, Self::Done];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Done => "done",
        }
    }

    /// Whether this is the terminal column.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Scheduling priority. Orthogonal to rank: priority is a field, rank is
/// the position within the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// How an item was resolved. `resolution_date` on the item is set iff this
/// is not `Unresolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    #[default]
    Unresolved,
    Done,
    WontFix,
    Duplicate,
    Incomplete,
}

impl Resolution {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Done => "done",
            Self::WontFix => "wont-fix",
            Self::Duplicate => "duplicate",
            Self::Incomplete => "incomplete",
        }
    }
}

/// The live work-item aggregate.
///
/// Mutable fields reflect only the *latest* state; anything historical
/// (status, sprint membership) must go through the change log and the
/// reconstructor instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub project_id: String,
    /// Human-readable project-scoped key, e.g. `PROJ-123`. Unique among
    /// non-deleted items within a project; never reused.
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub item_type: ItemType,
    pub status: Status,
    pub priority: Priority,
    /// Opaque sortable position within `(project, status)`.
    pub rank: Rank,
    pub story_points: Option<f64>,
    /// Current sprint membership only. Historical membership lives in the
    /// change log.
    pub sprint_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub parent_id: Option<String>,
    pub epic_id: Option<String>,
    /// Symmetric links; every edge appears on both endpoints.
    pub linked_ids: Vec<String>,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub resolution: Resolution,
    pub resolution_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Whether the item has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Story points, defaulting unestimated items to zero for arithmetic.
    #[must_use]
    pub fn points(&self) -> f64 {
        self.story_points.unwrap_or(0.0)
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}

impl FromStr for ItemType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "task" => Ok(Self::Task),
            "bug" => Ok(Self::Bug),
            "story" => Ok(Self::Story),
            "epic" => Ok(Self::Epic),
            "subtask" => Ok(Self::Subtask),
            _ => Err(ParseEnumError {
                expected: "item type",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "backlog" => Ok(Self::Backlog),
            "todo" => Ok(Self::Todo),
            "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(ParseEnumError {
                expected: "status",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ParseEnumError {
                expected: "priority",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Resolution {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "unresolved" => Ok(Self::Unresolved),
            "done" => Ok(Self::Done),
            "wont-fix" => Ok(Self::WontFix),
            "duplicate" => Ok(Self::Duplicate),
            "incomplete" => Ok(Self::Incomplete),
            _ => Err(ParseEnumError {
                expected: "resolution",
                got: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemType, Priority, Resolution, Status};
    use std::str::FromStr;

    #[test]
    fn enum_json_roundtrips() {
        assert_eq!(serde_json::to_string(&ItemType::Story).expect("ser"), "\"story\"");
        assert_eq!(
            serde_json::to_string(&Status::InProgress).expect("ser"),
            "\"in-progress\""
        );
        assert_eq!(
            serde_json::to_string(&Resolution::WontFix).expect("ser"),
            "\"wont-fix\""
        );
        assert_eq!(serde_json::to_string(&Priority::High).expect("ser"), "\"high\"");

        assert_eq!(
            serde_json::from_str::<Status>("\"backlog\"").expect("de"),
            Status::Backlog
        );
        assert_eq!(
            serde_json::from_str::<ItemType>("\"subtask\"").expect("de"),
            ItemType::Subtask
        );
    }

    #[test]
    fn display_parse_roundtrips() {
        for value in [
            ItemType::Task,
            ItemType::Bug,
            ItemType::Story,
            ItemType::Epic,
            ItemType::Subtask,
        ] {
            assert_eq!(ItemType::from_str(&value.to_string()).expect("parse"), value);
        }

        for value in Status::ALL {
            assert_eq!(Status::from_str(&value.to_string()).expect("parse"), value);
        }

        for value in [
            Resolution::Unresolved,
            Resolution::Done,
            Resolution::WontFix,
            Resolution::Duplicate,
            Resolution::Incomplete,
        ] {
            assert_eq!(Resolution::from_str(&value.to_string()).expect("parse"), value);
        }

        for value in [Priority::Low, Priority::Medium, Priority::High, Priority::Critical] {
            assert_eq!(Priority::from_str(&value.to_string()).expect("parse"), value);
        }
    }

    #[test]
    fn parse_rejects_unknown_values() {
        assert!(ItemType::from_str("initiative").is_err());
        assert!(Status::from_str("in-review").is_err());
        assert!(Priority::from_str("blocker").is_err());
        assert!(Resolution::from_str("fixed").is_err());
    }

    #[test]
    fn only_done_is_terminal() {
        assert!(Status::Done.is_terminal());
        for status in [Status::Backlog, Status::Todo, Status::InProgress] {
            assert!(!status.is_terminal());
        }
    }
}
