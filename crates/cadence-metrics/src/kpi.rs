//! Per-sprint KPIs: commitment, completion, scope change, reliability,
//! cycle and lead time.

use serde::Serialize;

use cadence_core::changelog::fields;

use crate::scope::{ScopedItem, SprintScope, end_of_day};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// KPI record for one sprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SprintKpis {
    pub sprint_id: String,
    pub sprint_key: String,
    /// Points of items that were members when the sprint started.
    pub committed_points: f64,
    /// Points of items that completed inside the sprint window.
    pub completed_points: f64,
    /// Count of items that completed inside the window.
    pub throughput_issues: usize,
    /// Committed points that did not complete in-window.
    pub spillover_points: f64,
    /// Points added to the sprint after it started (full value per
    /// qualifying change event).
    pub added_scope_points: f64,
    /// Points removed from the sprint after it started.
    pub removed_scope_points: f64,
    /// `completed / committed`; 0 when nothing was committed.
    pub commitment_reliability: f64,
    /// Mean days from entering `in-progress` to completing, over items
    /// that did both in-window. 0 when no item qualifies.
    pub cycle_time_days: f64,
    /// Mean days from creation to in-window completion. 0 when no item
    /// completed.
    pub lead_time_days: f64,
}

/// Item-level narrowing for KPI queries. Empty sets mean "no filter";
/// non-empty sets are OR within a field and AND across fields.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub epics: Vec<String>,
}

impl ItemFilter {
    fn matches(&self, scoped: &ScopedItem) -> bool {
        if !self.assignees.is_empty() {
            let Some(assignee) = &scoped.item.assignee else {
                return false;
            };
            if !self.assignees.contains(assignee) {
                return false;
            }
        }
        if !self.labels.is_empty()
            && !scoped.item.labels.iter().any(|label| self.labels.contains(label))
        {
            return false;
        }
        if !self.epics.is_empty() {
            let Some(epic_id) = &scoped.item.epic_id else {
                return false;
            };
            if !self.epics.contains(epic_id) {
                return false;
            }
        }
        true
    }

    /// Narrow a scope to the matching items.
    #[must_use]
    pub fn apply(&self, scope: &SprintScope) -> SprintScope {
        SprintScope {
            sprint: scope.sprint.clone(),
            items: scope
                .items
                .iter()
                .filter(|scoped| self.matches(scoped))
                .cloned()
                .collect(),
        }
    }
}

/// Compute the KPI record for one sprint scope, after item-level
/// narrowing.
#[must_use]
pub fn sprint_kpis(scope: &SprintScope, filter: &ItemFilter) -> SprintKpis {
    let scope = filter.apply(scope);
    let sprint = &scope.sprint;
    let window_end = end_of_day(sprint.end_date.date_naive());

    let committed = scope.committed_items();
    let committed_points: f64 = committed.iter().map(|scoped| scoped.item.points()).sum();

    let mut completed_points = 0.0;
    let mut throughput_issues = 0usize;
    let mut cycle_samples: Vec<f64> = Vec::new();
    let mut lead_samples: Vec<f64> = Vec::new();

    for scoped in &scope.items {
        let Some(done_at) = scope.completion_instant(scoped) else {
            continue;
        };
        completed_points += scoped.item.points();
        throughput_issues += 1;

        #[allow(clippy::cast_precision_loss)]
        lead_samples
            .push((done_at - scoped.item.created_at).num_seconds() as f64 / SECONDS_PER_DAY);

        if let Some(started_at) = scope.in_progress_instant(scoped) {
            if done_at >= started_at {
                #[allow(clippy::cast_precision_loss)]
                cycle_samples
                    .push((done_at - started_at).num_seconds() as f64 / SECONDS_PER_DAY);
            }
        }
    }

    let spillover_points: f64 = committed
        .iter()
        .filter(|scoped| scope.completion_instant(scoped).is_none())
        .map(|scoped| scoped.item.points())
        .sum();

    let mut added_scope_points = 0.0;
    let mut removed_scope_points = 0.0;
    for scoped in &scope.items {
        for entry in &scoped.changes {
            if entry.field != fields::SPRINT
                || entry.at <= sprint.start_date
                || entry.at > window_end
            {
                continue;
            }
            if entry.new_value.as_deref() == Some(sprint.id.as_str()) {
                added_scope_points += scoped.item.points();
            }
            if entry.old_value.as_deref() == Some(sprint.id.as_str()) {
                removed_scope_points += scoped.item.points();
            }
        }
    }

    let commitment_reliability = if committed_points > 0.0 {
        completed_points / committed_points
    } else {
        0.0
    };

    SprintKpis {
        sprint_id: sprint.id.clone(),
        sprint_key: sprint.key.clone(),
        committed_points,
        completed_points,
        throughput_issues,
        spillover_points,
        added_scope_points,
        removed_scope_points,
        commitment_reliability,
        cycle_time_days: mean(&cycle_samples),
        lead_time_days: mean(&lead_samples),
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemFilter, sprint_kpis};
    use crate::testutil::{ScopeBuilder, day, instant};

    #[test]
    fn committed_completed_and_spillover() {
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("a", 8.0, |item| {
                item.committed()
                    .in_progress_at(instant(2, 9))
                    .done_at(instant(4, 9))
            })
            .item("b", 5.0, |item| item.committed())
            .build();

        let kpis = sprint_kpis(&scope, &ItemFilter::default());
        assert_eq!(kpis.committed_points, 13.0);
        assert_eq!(kpis.completed_points, 8.0);
        assert_eq!(kpis.throughput_issues, 1);
        assert_eq!(kpis.spillover_points, 5.0);
        assert!((kpis.commitment_reliability - 8.0 / 13.0).abs() < 1e-9);
    }

    #[test]
    fn zero_commitment_yields_zero_reliability() {
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("late", 3.0, |item| item.added_at(instant(2, 9)).done_at(instant(3, 9)))
            .build();

        let kpis = sprint_kpis(&scope, &ItemFilter::default());
        assert_eq!(kpis.committed_points, 0.0);
        assert_eq!(kpis.commitment_reliability, 0.0);
        assert_eq!(kpis.completed_points, 3.0);
    }

    #[test]
    fn scope_changes_count_full_value_per_event() {
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("a", 8.0, |item| item.committed())
            .item("in", 3.0, |item| item.added_at(instant(2, 9)))
            .item("out", 5.0, |item| item.committed().removed_at(instant(3, 9)))
            .build();

        let kpis = sprint_kpis(&scope, &ItemFilter::default());
        assert_eq!(kpis.added_scope_points, 3.0);
        assert_eq!(kpis.removed_scope_points, 5.0);
    }

    #[test]
    fn cycle_and_lead_time_are_daily_averages() {
        let scope = ScopeBuilder::new(day(1), day(9))
            .item("a", 3.0, |item| {
                item.created_on(day(1))
                    .committed()
                    .in_progress_at(instant(2, 0))
                    .done_at(instant(4, 0))
            })
            .item("b", 5.0, |item| {
                item.created_on(day(1))
                    .committed()
                    .in_progress_at(instant(3, 0))
                    .done_at(instant(7, 0))
            })
            .build();

        let kpis = sprint_kpis(&scope, &ItemFilter::default());
        // Cycle: (2 + 4) / 2; lead: (3 + 6) / 2 (created at midnight of day 1).
        assert!((kpis.cycle_time_days - 3.0).abs() < 1e-9);
        assert!((kpis.lead_time_days - 4.5).abs() < 1e-9);
    }

    #[test]
    fn items_without_in_progress_are_excluded_from_cycle_time() {
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("a", 3.0, |item| item.committed().done_at(instant(2, 0)))
            .build();

        let kpis = sprint_kpis(&scope, &ItemFilter::default());
        assert_eq!(kpis.cycle_time_days, 0.0);
        assert_eq!(kpis.throughput_issues, 1);
    }

    #[test]
    fn item_filters_narrow_before_computation() {
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("a", 8.0, |item| item.committed().assignee("alice").done_at(instant(2, 0)))
            .item("b", 5.0, |item| item.committed().assignee("bob"))
            .item("c", 2.0, |item| item.committed().label("infra"))
            .build();

        let by_assignee = sprint_kpis(
            &scope,
            &ItemFilter {
                assignees: vec!["alice".to_string()],
                ..ItemFilter::default()
            },
        );
        assert_eq!(by_assignee.committed_points, 8.0);
        assert_eq!(by_assignee.completed_points, 8.0);
        assert!((by_assignee.commitment_reliability - 1.0).abs() < f64::EPSILON);

        let by_label = sprint_kpis(
            &scope,
            &ItemFilter {
                labels: vec!["infra".to_string()],
                ..ItemFilter::default()
            },
        );
        assert_eq!(by_label.committed_points, 2.0);
        assert_eq!(by_label.completed_points, 0.0);
    }

    #[test]
    fn epic_filter_narrows_to_epic_members() {
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("a", 8.0, |item| item.committed().epic("ep-1"))
            .item("b", 5.0, |item| item.committed())
            .build();

        let kpis = sprint_kpis(
            &scope,
            &ItemFilter {
                epics: vec!["ep-1".to_string()],
                ..ItemFilter::default()
            },
        );
        assert_eq!(kpis.committed_points, 8.0);
        assert_eq!(kpis.spillover_points, 8.0);
    }
}
