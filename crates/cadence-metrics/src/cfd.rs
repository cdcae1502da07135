//! Cumulative flow diagram: story points per status bucket per day.

use chrono::NaiveDate;
use serde::Serialize;

use cadence_core::history;

use crate::scope::{SprintScope, end_of_day};

/// The four fixed CFD buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CfdBucket {
    Todo,
    InProgress,
    Review,
    Done,
}

/// Map a raw status string into its bucket.
///
/// The board's own columns map directly; values outside the core set
/// (imported logs, foreign workflows) go through a fixed lookup with
/// `todo` as the default.
#[must_use]
pub fn bucket_for_status(raw: &str) -> CfdBucket {
    match raw.trim().to_ascii_lowercase().as_str() {
        "in-progress" => CfdBucket::InProgress,
        "review" | "in-review" | "testing" => CfdBucket::Review,
        "done" | "completed" | "closed" => CfdBucket::Done,
        // backlog, selected, to-do, todo, and anything unknown.
        _ => CfdBucket::Todo,
    }
}

/// One day of the cumulative flow diagram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CfdRow {
    pub date: NaiveDate,
    pub todo: f64,
    pub in_progress: f64,
    pub review: f64,
    pub done: f64,
}

impl CfdRow {
    const fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            todo: 0.0,
            in_progress: 0.0,
            review: 0.0,
            done: 0.0,
        }
    }

    fn add(&mut self, bucket: CfdBucket, points: f64) {
        match bucket {
            CfdBucket::Todo => self.todo += points,
            CfdBucket::InProgress => self.in_progress += points,
            CfdBucket::Review => self.review += points,
            CfdBucket::Done => self.done += points,
        }
    }

    /// Sum over all buckets; equals the membership's total points for the
    /// day (conservation).
    #[must_use]
    pub fn total(&self) -> f64 {
        self.todo + self.in_progress + self.review + self.done
    }
}

/// Compute the CFD: for each sprint day, each member item's points land in
/// exactly one bucket, derived from its reconstructed status at the end of
/// that day.
#[must_use]
pub fn cfd(scope: &SprintScope) -> Vec<CfdRow> {
    scope
        .sprint
        .days()
        .into_iter()
        .map(|day| {
            let mut row = CfdRow::empty(day);
            for scoped in &scope.items {
                if !scope.member_on(scoped, day) {
                    continue;
                }
                let status =
                    history::status_as_of(&scoped.item, &scoped.changes, end_of_day(day));
                row.add(bucket_for_status(status), scoped.item.points());
            }
            row
        })
        .collect()
}
