//! Domain error taxonomy for the engine.
//!
//! Every fallible operation at the crate boundary returns [`Error`]. The
//! variants follow the propagation policy: all of them are recoverable at
//! the API-boundary layer, `Conflict` is transient and safe to retry from
//! scratch, and nothing here should ever crash the process.

use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    Validation,
    GateBlocked,
    Conflict,
    Unauthorized,
    Storage,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "E2001",
            Self::Validation => "E2002",
            Self::GateBlocked => "E2003",
            Self::Conflict => "E5001",
            Self::Unauthorized => "E4001",
            Self::Storage => "E5002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotFound => "Referenced entity not found",
            Self::Validation => "Validation failed",
            Self::GateBlocked => "Transition blocked by outstanding reviews",
            Self::Conflict => "Write conflict",
            Self::Unauthorized => "Actor not allowed to perform this action",
            Self::Storage => "Storage error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotFound => None,
            Self::Validation => Some("Fix the referenced ids/values and retry."),
            Self::GateBlocked => {
                Some("Resolve outstanding review approvals before moving the item to done.")
            }
            Self::Conflict => Some("Retry the whole operation; it is idempotent at the business level."),
            Self::Unauthorized => None,
            Self::Storage => Some("Check the database file and its permissions."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Engine-level error returned by all mutating and query operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced project/item/sprint/epic/parent/review does not resolve
    /// (or is soft-deleted). Never retried automatically.
    #[error("{kind} '{reference}' not found")]
    NotFound {
        kind: &'static str,
        reference: String,
    },

    /// Malformed input or reference: wrong target type, circular parent
    /// chain, duplicate reviewer, negative points, and so on.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A transition into the terminal status was attempted while reviews
    /// are outstanding. The counts are part of the contract: callers must
    /// be able to tell the user what is blocking.
    #[error(
        "cannot move '{item}' to done: {pending} pending and {changes_requested} \
         changes-requested review(s) outstanding"
    )]
    GateBlocked {
        item: String,
        pending: usize,
        changes_requested: usize,
    },

    /// Transaction abort due to contention (counter allocation, rank
    /// computation). Transient: safe to retry the whole operation.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Review-specific domain authorization: only assigned reviewers may
    /// act, only the requester may cancel. Generic role checks live with
    /// the caller, not here.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Underlying SQLite failure that is not a recognizable busy/locked
    /// conflict.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl Error {
    /// The stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Validation(_) => ErrorCode::Validation,
            Self::GateBlocked { .. } => ErrorCode::GateBlocked,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Storage(_) => ErrorCode::Storage,
        }
    }

    /// Whether retrying the whole operation from scratch is reasonable.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub(crate) fn not_found(kind: &'static str, reference: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            reference: reference.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Classify a raw rusqlite error: busy/locked become [`Error::Conflict`]
    /// so callers get the documented transient-retry semantics, everything
    /// else passes through as [`Error::Storage`].
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode as Sq;
        match err.sqlite_error_code() {
            Some(Sq::DatabaseBusy | Sq::DatabaseLocked) => {
                Self::Conflict(format!("database busy: {err}"))
            }
            _ => Self::Storage(err),
        }
    }
}

impl From<crate::model::item::ParseEnumError> for Error {
    fn from(err: crate::model::item::ParseEnumError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<crate::rank::RankError> for Error {
    fn from(err: crate::rank::RankError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode};
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotFound,
            ErrorCode::Validation,
            ErrorCode::GateBlocked,
            ErrorCode::Conflict,
            ErrorCode::Unauthorized,
            ErrorCode::Storage,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::GateBlocked.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn gate_blocked_message_enumerates_counts() {
        let err = Error::GateBlocked {
            item: "PROJ-7".to_string(),
            pending: 2,
            changes_requested: 1,
        };
        let rendered = err.to_string();
        assert!(rendered.contains("2 pending"));
        assert!(rendered.contains("1 changes-requested"));
    }

    #[test]
    fn busy_maps_to_conflict() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("busy".to_string()),
        );
        let err = Error::from_sqlite(busy);
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.is_transient());
    }
}
