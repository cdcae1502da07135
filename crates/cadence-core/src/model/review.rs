//! Review aggregate and its state machine.
//!
//! Reviewer sub-records carry their own status and are re-actionable: a
//! reviewer may flip between approved and changes-requested any number of
//! times. The overall status is a pure function of the reviewer statuses
//! ([`Review::derived_status`]) except for the terminal `cancelled` and
//! `expired` states, which are set out-of-band and absorb everything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::item::ParseEnumError;
use crate::error::{Error, Result};

/// Per-reviewer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewerStatus {
    Pending,
    Approved,
    ChangesRequested,
}

impl ReviewerStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::ChangesRequested => "changes-requested",
        }
    }
}

impl fmt::Display for ReviewerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reviewer's verdict on a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approve,
    RequestChanges,
}

impl ReviewVerdict {
    const fn reviewer_status(self) -> ReviewerStatus {
        match self {
            Self::Approve => ReviewerStatus::Approved,
            Self::RequestChanges => ReviewerStatus::ChangesRequested,
        }
    }
}

/// Overall review state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    ChangesRequested,
    Cancelled,
    Expired,
}

impl ReviewStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::ChangesRequested => "changes-requested",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Terminal states accept no further reviewer actions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// Whether this review blocks its item's transition into done.
    #[must_use]
    pub const fn is_outstanding(self) -> bool {
        matches!(self, Self::Pending | Self::ChangesRequested)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "changes-requested" => Ok(Self::ChangesRequested),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(ParseEnumError {
                expected: "review status",
                got: s.to_string(),
            }),
        }
    }
}

/// A reviewer sub-record with independent lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub user: String,
    pub status: ReviewerStatus,
    pub comment: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
}

impl Reviewer {
    #[must_use]
    pub const fn pending(user: String) -> Self {
        Self {
            user,
            status: ReviewerStatus::Pending,
            comment: None,
            acted_at: None,
        }
    }
}

/// One checklist entry on a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub label: String,
    pub done: bool,
    pub done_by: Option<String>,
    pub done_at: Option<DateTime<Utc>>,
}

impl ChecklistItem {
    #[must_use]
    pub const fn open(label: String) -> Self {
        Self {
            label,
            done: false,
            done_by: None,
            done_at: None,
        }
    }
}

/// A review gating an item's transition into the terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub item_id: String,
    pub requested_by: String,
    pub reviewers: Vec<Reviewer>,
    pub required_approvals: u32,
    pub checklist: Vec<ChecklistItem>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Review {
    /// The overall status implied by the reviewer sub-records.
    ///
    /// `changes-requested` wins over everything, then `approved` once the
    /// approval count reaches `required_approvals`, otherwise `pending`.
    /// Terminal states are not derived; they are set out-of-band.
    #[must_use]
    pub fn derived_status(&self) -> ReviewStatus {
        if self
            .reviewers
            .iter()
            .any(|r| r.status == ReviewerStatus::ChangesRequested)
        {
            return ReviewStatus::ChangesRequested;
        }

        let approvals = self
            .reviewers
            .iter()
            .filter(|r| r.status == ReviewerStatus::Approved)
            .count();
        if approvals as u64 >= u64::from(self.required_approvals) {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Pending
        }
    }

    fn ensure_actionable(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::validation(format!(
                "review '{}' is {} and accepts no further actions",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Record a reviewer's verdict and recompute the overall status.
    ///
    /// Re-actioning is allowed: an approved reviewer may later request
    /// changes and vice versa.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Validation`] on a terminal review and with
    /// [`Error::Unauthorized`] when `user` is not an assigned reviewer.
    pub fn record_verdict(
        &mut self,
        user: &str,
        verdict: ReviewVerdict,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_actionable()?;

        let reviewer = self
            .reviewers
            .iter_mut()
            .find(|r| r.user == user)
            .ok_or_else(|| {
                Error::Unauthorized(format!("'{user}' is not a reviewer on review"))
            })?;

        reviewer.status = verdict.reviewer_status();
        reviewer.comment = comment;
        reviewer.acted_at = Some(now);

        self.status = self.derived_status();
        Ok(())
    }

    /// Cancel the review. Only the original requester may cancel.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Unauthorized`] for anyone else and with
    /// [`Error::Validation`] when the review is already terminal.
    pub fn cancel(&mut self, by: &str) -> Result<()> {
        self.ensure_actionable()?;
        if by != self.requested_by {
            return Err(Error::Unauthorized(format!(
                "only the requester '{}' may cancel this review",
                self.requested_by
            )));
        }
        self.status = ReviewStatus::Cancelled;
        Ok(())
    }

    /// Expire the review (out-of-band terminal transition).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Validation`] when already terminal.
    pub fn expire(&mut self) -> Result<()> {
        self.ensure_actionable()?;
        self.status = ReviewStatus::Expired;
        Ok(())
    }

    /// Add a pending reviewer.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Validation`] on duplicates or a terminal review.
    pub fn add_reviewer(&mut self, user: &str) -> Result<()> {
        self.ensure_actionable()?;
        if self.reviewers.iter().any(|r| r.user == user) {
            return Err(Error::validation(format!(
                "'{user}' is already a reviewer on review '{}'",
                self.id
            )));
        }
        self.reviewers.push(Reviewer::pending(user.to_string()));
        self.status = self.derived_status();
        Ok(())
    }

    /// Remove a reviewer and recompute the overall status.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Validation`] when absent or terminal.
    pub fn remove_reviewer(&mut self, user: &str) -> Result<()> {
        self.ensure_actionable()?;
        let before = self.reviewers.len();
        self.reviewers.retain(|r| r.user != user);
        if self.reviewers.len() == before {
            return Err(Error::validation(format!(
                "'{user}' is not a reviewer on review '{}'",
                self.id
            )));
        }
        self.status = self.derived_status();
        Ok(())
    }

    /// Toggle a checklist entry, stamping or clearing who did it and when.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Validation`] on an out-of-range index or a
    /// terminal review.
    pub fn toggle_checklist(&mut self, index: usize, user: &str, now: DateTime<Utc>) -> Result<()> {
        self.ensure_actionable()?;
        let len = self.checklist.len();
        let entry = self.checklist.get_mut(index).ok_or_else(|| {
            Error::validation(format!(
                "checklist index {index} out of range (review has {len} entries)"
            ))
        })?;

        if entry.done {
            entry.done = false;
            entry.done_by = None;
            entry.done_at = None;
        } else {
            entry.done = true;
            entry.done_by = Some(user.to_string());
            entry.done_at = Some(now);
        }
        Ok(())
    }
}
