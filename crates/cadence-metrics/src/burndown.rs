//! Burndown series: ideal vs actual remaining points, one row per sprint
//! day.

use chrono::NaiveDate;
use serde::Serialize;

use crate::scope::SprintScope;

/// One day of the burndown chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurndownPoint {
    pub date: NaiveDate,
    /// Linear glide path from the commitment to zero, rounded.
    pub ideal: f64,
    /// Commitment minus completed work plus net scope change, floored at
    /// zero.
    pub actual: f64,
}

/// Compute the burndown series for the sprint's inclusive day range.
///
/// `ideal[i] = committed * (1 - i/(N-1))` for day index `i` of `N` days
/// (a single-day sprint simply shows the full commitment). `actual`
/// subtracts the points of items completed on or before each day and adds
/// the net scope change since the sprint started; it never goes negative.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn burndown(scope: &SprintScope) -> Vec<BurndownPoint> {
    let days = scope.sprint.days();
    let total = days.len();
    let committed = scope.committed_points();

    let completions: Vec<Option<NaiveDate>> = scope
        .items
        .iter()
        .map(|scoped| scope.completion_instant(scoped).map(|at| at.date_naive()))
        .collect();

    days.iter()
        .enumerate()
        .map(|(i, day)| {
            let ideal = if total <= 1 {
                committed
            } else {
                (committed * (1.0 - i as f64 / (total - 1) as f64)).round()
            };

            let completed: f64 = scope
                .items
                .iter()
                .zip(&completions)
                .filter(|(_, done)| done.is_some_and(|d| d <= *day))
                .map(|(scoped, _)| scoped.item.points())
                .sum();

            let actual = (committed - completed + scope.net_scope_change_through(*day)).max(0.0);

            BurndownPoint {
                date: *day,
                ideal,
                actual,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::burndown;
    use crate::testutil::{ScopeBuilder, day, instant};

    #[test]
    fn ideal_glides_linearly_to_zero() {
        // 20 committed points over 5 days, nothing completed, no scope
        // change: ideal walks 20,15,10,5,0 and actual stays flat at 20.
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("a", 12.0, |item| item.committed())
            .item("b", 8.0, |item| item.committed())
            .build();

        let series = burndown(&scope);
        let ideals: Vec<f64> = series.iter().map(|p| p.ideal).collect();
        let actuals: Vec<f64> = series.iter().map(|p| p.actual).collect();

        assert_eq!(ideals, vec![20.0, 15.0, 10.0, 5.0, 0.0]);
        assert_eq!(actuals, vec![20.0; 5]);
    }

    #[test]
    fn single_day_sprint_guards_the_division() {
        let scope = ScopeBuilder::new(day(1), day(1))
            .item("a", 5.0, |item| item.committed())
            .build();

        let series = burndown(&scope);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].ideal, 5.0);
        assert_eq!(series[0].actual, 5.0);
    }

    #[test]
    fn completions_burn_points_down_from_their_day() {
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("a", 8.0, |item| item.committed().done_at(instant(3, 10)))
            .item("b", 5.0, |item| item.committed())
            .build();

        let series = burndown(&scope);
        let actuals: Vec<f64> = series.iter().map(|p| p.actual).collect();
        assert_eq!(actuals, vec![13.0, 13.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn scope_added_after_start_raises_actual() {
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("a", 8.0, |item| item.committed())
            .item("late", 3.0, |item| item.added_at(instant(2, 12)))
            .build();

        let series = burndown(&scope);
        let actuals: Vec<f64> = series.iter().map(|p| p.actual).collect();
        assert_eq!(actuals, vec![8.0, 11.0, 11.0, 11.0, 11.0]);
    }

    #[test]
    fn scope_removed_after_start_lowers_actual() {
        let scope = ScopeBuilder::new(day(1), day(5))
            .item("a", 8.0, |item| item.committed())
            .item("b", 5.0, |item| item.committed().removed_at(instant(3, 9)))
            .build();

        let series = burndown(&scope);
        let actuals: Vec<f64> = series.iter().map(|p| p.actual).collect();
        assert_eq!(actuals, vec![13.0, 13.0, 8.0, 8.0, 8.0]);
    }

    #[test]
    fn actual_is_floored_at_zero() {
        // Removing more points than remain cannot push actual negative.
        let scope = ScopeBuilder::new(day(1), day(3))
            .item("a", 2.0, |item| item.committed().done_at(instant(1, 15)))
            .item("b", 5.0, |item| item.committed().removed_at(instant(2, 9)))
            .build();

        let series = burndown(&scope);
        let actuals: Vec<f64> = series.iter().map(|p| p.actual).collect();
        assert_eq!(actuals, vec![5.0, 0.0, 0.0]);
    }
}
