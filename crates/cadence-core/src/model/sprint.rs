use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::item::ParseEnumError;
use crate::error::{Error, Result};

/// Sprint lifecycle. Only completed sprints feed velocity history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintStatus {
    Planned,
    Active,
    Completed,
}

impl SprintStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SprintStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planned" => Ok(Self::Planned),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            _ => Err(ParseEnumError {
                expected: "sprint status",
                got: s.to_string(),
            }),
        }
    }
}

/// An iteration container with an inclusive day range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: String,
    pub project_id: String,
    pub key: String,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SprintStatus,
}

impl Sprint {
    /// Validate the `start <= end` invariant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the range is inverted.
    pub fn validate(&self) -> Result<()> {
        if self.start_date > self.end_date {
            return Err(Error::validation(format!(
                "sprint '{}' has start_date after end_date",
                self.key
            )));
        }
        Ok(())
    }

    /// The inclusive calendar days `[start, end]` the sprint covers.
    #[must_use]
    pub fn days(&self) -> Vec<NaiveDate> {
        let start = self.start_date.date_naive();
        let end = self.end_date.date_naive();
        start
            .iter_days()
            .take_while(|day| *day <= end)
            .collect()
    }
}
