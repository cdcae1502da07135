//! Sprint scope: the inputs every metric computes over.
//!
//! A [`SprintScope`] is a resolved sprint plus every item *ever*
//! associated with it (current membership or any `sprint` change entry),
//! each with its full change log. Metrics are pure functions over this
//! snapshot — they reflect the state as of when the scope was loaded.

use chrono::{DateTime, NaiveDate, Utc};

use cadence_core::changelog::{ChangeEntry, fields};
use cadence_core::history;
use cadence_core::model::{Sprint, WorkItem};

/// One item with its change log.
#[derive(Debug, Clone)]
pub struct ScopedItem {
    pub item: WorkItem,
    pub changes: Vec<ChangeEntry>,
}

/// A sprint and the items ever associated with it.
#[derive(Debug, Clone)]
pub struct SprintScope {
    pub sprint: Sprint,
    pub items: Vec<ScopedItem>,
}

/// The last representable instant of a calendar day. Day-granularity
/// metrics probe membership and status at this instant.
#[must_use]
pub fn end_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_hms_opt(23, 59, 59)
        .unwrap_or_default()
        .and_utc()
}

impl SprintScope {
    /// Items that were members when the sprint started — the commitment.
    #[must_use]
    pub fn committed_items(&self) -> Vec<&ScopedItem> {
        self.items
            .iter()
            .filter(|scoped| {
                history::was_member_of_sprint_as_of(
                    &scoped.item,
                    &scoped.changes,
                    &self.sprint.id,
                    self.sprint.start_date,
                )
            })
            .collect()
    }

    /// Sum of story points committed at sprint start.
    #[must_use]
    pub fn committed_points(&self) -> f64 {
        self.committed_items()
            .iter()
            .map(|scoped| scoped.item.points())
            .sum()
    }

    /// Whether `scoped` was a member at the end of `day`.
    #[must_use]
    pub fn member_on(&self, scoped: &ScopedItem, day: NaiveDate) -> bool {
        history::was_member_of_sprint_as_of(
            &scoped.item,
            &scoped.changes,
            &self.sprint.id,
            end_of_day(day),
        )
    }

    /// The instant `scoped` completed within the sprint window: the
    /// earliest `status -> done` entry between the sprint start instant
    /// and the end of the last sprint day. `None` when it never completed
    /// in-window. Re-completions after a reopen do not move the instant.
    #[must_use]
    pub fn completion_instant(&self, scoped: &ScopedItem) -> Option<DateTime<Utc>> {
        let window_end = end_of_day(self.sprint.end_date.date_naive());
        scoped
            .changes
            .iter()
            .filter(|entry| {
                entry.field == fields::STATUS
                    && entry.new_value.as_deref() == Some("done")
                    && entry.at >= self.sprint.start_date
                    && entry.at <= window_end
            })
            .map(|entry| entry.at)
            .min()
    }

    /// The instant `scoped` first entered `in-progress` within the sprint
    /// window.
    #[must_use]
    pub fn in_progress_instant(&self, scoped: &ScopedItem) -> Option<DateTime<Utc>> {
        let window_end = end_of_day(self.sprint.end_date.date_naive());
        scoped
            .changes
            .iter()
            .filter(|entry| {
                entry.field == fields::STATUS
                    && entry.new_value.as_deref() == Some("in-progress")
                    && entry.at >= self.sprint.start_date
                    && entry.at <= window_end
            })
            .map(|entry| entry.at)
            .min()
    }

    /// Net scope change (in points) from strictly after the sprint start
    /// through the end of `day`: each sprint-assignment entry adds the
    /// item's full point value, each removal subtracts it.
    #[must_use]
    pub fn net_scope_change_through(&self, day: NaiveDate) -> f64 {
        let cutoff = end_of_day(day);
        let mut net = 0.0;
        for scoped in &self.items {
            for entry in &scoped.changes {
                if entry.field != fields::SPRINT
                    || entry.at <= self.sprint.start_date
                    || entry.at > cutoff
                {
                    continue;
                }
                if entry.new_value.as_deref() == Some(self.sprint.id.as_str()) {
                    net += scoped.item.points();
                }
                if entry.old_value.as_deref() == Some(self.sprint.id.as_str()) {
                    net -= scoped.item.points();
                }
            }
        }
        net
    }
}
