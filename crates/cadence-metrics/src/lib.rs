//! Sprint analytics for cadence.
//!
//! Burndown, cumulative flow, per-sprint KPIs, and velocity rollups —
//! all derived from work-item change logs through the point-in-time
//! reconstructor, never from the live fields alone. The metric functions
//! are pure over a loaded [`scope::SprintScope`]; [`report`] binds them
//! to the store.

pub mod burndown;
pub mod cfd;
pub mod kpi;
pub mod report;
pub mod scope;
pub mod velocity;

pub use burndown::BurndownPoint;
pub use cfd::{CfdBucket, CfdRow};
pub use kpi::{ItemFilter, SprintKpis};
pub use report::{KpiFilter, VelocityReport};
pub use scope::{ScopedItem, SprintScope};
pub use velocity::VelocityStats;

#[cfg(test)]
mod testutil {
    //! Scenario builders shared by the unit tests.

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use cadence_core::changelog::{ChangeEntry, fields};
    use cadence_core::model::{ItemType, Priority, Resolution, Sprint, SprintStatus, Status, WorkItem};
    use cadence_core::rank;

    use crate::scope::{ScopedItem, SprintScope};

    pub const SPRINT_ID: &str = "sp-1";

    /// Day `n` of the fixed test month.
    pub fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, n).expect("valid test day")
    }

    /// `hour` o'clock UTC on day `n`.
    pub fn instant(n: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, n, hour, 0, 0)
            .single()
            .expect("valid test instant")
    }

    pub struct ItemBuilder {
        sprint_start: DateTime<Utc>,
        item: WorkItem,
        changes: Vec<ChangeEntry>,
    }

    impl ItemBuilder {
        fn new(key: &str, points: f64, sprint_start: DateTime<Utc>) -> Self {
            let mut builder = Self {
                sprint_start,
                item: WorkItem {
                    id: format!("it-{key}"),
                    project_id: "p-1".to_string(),
                    key: format!("PROJ-{key}"),
                    title: key.to_string(),
                    description: None,
                    item_type: ItemType::Task,
                    status: Status::Todo,
                    priority: Priority::Medium,
                    rank: rank::initial(),
                    story_points: Some(points),
                    sprint_id: None,
                    due_date: None,
                    parent_id: None,
                    epic_id: None,
                    linked_ids: Vec::new(),
                    assignee: None,
                    labels: Vec::new(),
                    resolution: Resolution::Unresolved,
                    resolution_date: None,
                    created_at: sprint_start - chrono::Duration::days(10),
                    deleted_at: None,
                },
                changes: Vec::new(),
            };
            // Every engine-created item leaves a status trail; seed the
            // move out of the backlog so day-level reconstruction does not
            // fall back to the final status.
            let first_move = builder.entry(
                fields::STATUS,
                Some("backlog"),
                Some("todo"),
                builder.item.created_at,
            );
            builder.changes.push(first_move);
            builder
        }

        fn entry(&self, field: &str, old: Option<&str>, new: Option<&str>, at: DateTime<Utc>) -> ChangeEntry {
            ChangeEntry::new(
                &self.item.id,
                field,
                old.map(str::to_string),
                new.map(str::to_string),
                "tester",
                at,
            )
        }

        /// Member at the sprint start (counts as committed).
        #[must_use]
        pub fn committed(mut self) -> Self {
            let at = self.item.created_at.min(self.sprint_start);
            let e = self.entry(fields::SPRINT, None, Some(SPRINT_ID), at);
            self.changes.push(e);
            self.item.sprint_id = Some(SPRINT_ID.to_string());
            self
        }

        /// Pulled into the sprint at `at` (after the start: added scope).
        #[must_use]
        pub fn added_at(mut self, at: DateTime<Utc>) -> Self {
            let e = self.entry(fields::SPRINT, None, Some(SPRINT_ID), at);
            self.changes.push(e);
            self.item.sprint_id = Some(SPRINT_ID.to_string());
            self
        }

        /// Dropped from the sprint at `at`.
        #[must_use]
        pub fn removed_at(mut self, at: DateTime<Utc>) -> Self {
            let e = self.entry(fields::SPRINT, Some(SPRINT_ID), None, at);
            self.changes.push(e);
            self.item.sprint_id = None;
            self
        }

        /// Transitioned into `in-progress` at `at`.
        #[must_use]
        pub fn in_progress_at(mut self, at: DateTime<Utc>) -> Self {
            let e = self.entry(fields::STATUS, Some("todo"), Some("in-progress"), at);
            self.changes.push(e);
            self.item.status = Status::InProgress;
            self
        }

        /// Completed at `at`.
        #[must_use]
        pub fn done_at(mut self, at: DateTime<Utc>) -> Self {
            let old = self.item.status.as_str().to_string();
            let e = self.entry(fields::STATUS, Some(&old), Some("done"), at);
            self.changes.push(e);
            self.item.status = Status::Done;
            self.item.resolution = Resolution::Done;
            self.item.resolution_date = Some(at);
            self
        }

        /// Arbitrary (possibly foreign) status transition at `at`.
        #[must_use]
        pub fn status_at(mut self, raw: &str, at: DateTime<Utc>) -> Self {
            let old = self.item.status.as_str().to_string();
            let e = self.entry(fields::STATUS, Some(&old), Some(raw), at);
            self.changes.push(e);
            self
        }

        #[must_use]
        pub fn assignee(mut self, user: &str) -> Self {
            self.item.assignee = Some(user.to_string());
            self
        }

        #[must_use]
        pub fn label(mut self, label: &str) -> Self {
            self.item.labels.push(label.to_string());
            self
        }

        #[must_use]
        pub fn epic(mut self, epic_id: &str) -> Self {
            self.item.epic_id = Some(epic_id.to_string());
            self
        }

        #[must_use]
        pub fn created_on(mut self, date: NaiveDate) -> Self {
            self.item.created_at = date.and_hms_opt(0, 0, 0).expect("midnight").and_utc();
            self
        }
    }

    pub struct ScopeBuilder {
        sprint: Sprint,
        items: Vec<ScopedItem>,
    }

    impl ScopeBuilder {
        pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
            Self {
                sprint: Sprint {
                    id: SPRINT_ID.to_string(),
                    project_id: "p-1".to_string(),
                    key: "S1".to_string(),
                    name: "Sprint 1".to_string(),
                    start_date: start.and_hms_opt(0, 0, 0).expect("midnight").and_utc(),
                    end_date: end.and_hms_opt(0, 0, 0).expect("midnight").and_utc(),
                    status: SprintStatus::Active,
                },
                items: Vec::new(),
            }
        }

        #[must_use]
        pub fn item(
            mut self,
            key: &str,
            points: f64,
            configure: impl FnOnce(ItemBuilder) -> ItemBuilder,
        ) -> Self {
            let builder = configure(ItemBuilder::new(key, points, self.sprint.start_date));
            self.items.push(ScopedItem {
                item: builder.item,
                changes: builder.changes,
            });
            self
        }

        #[must_use]
        pub fn build(self) -> SprintScope {
            SprintScope {
                sprint: self.sprint,
                items: self.items,
            }
        }
    }
}
