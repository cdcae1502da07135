//! Velocity rollups and the next-sprint forecast.

use serde::Serialize;

use cadence_core::config::ForecastPolicy;
use cadence_core::model::SprintStatus;

use crate::kpi::SprintKpis;

/// Statistical summary of a velocity series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityStats {
    pub avg: f64,
    pub median: f64,
    pub last5_avg: f64,
    pub last5_median: f64,
}

/// Summarize a velocity series: mean, median, and the same two statistics
/// over the trailing five entries. Empty input yields all zeros.
#[must_use]
pub fn to_velocity_stats(series: &[f64]) -> VelocityStats {
    let tail_start = series.len().saturating_sub(5);
    let tail = &series[tail_start..];
    VelocityStats {
        avg: mean(series),
        median: median(series),
        last5_avg: mean(tail),
        last5_median: median(tail),
    }
}

/// Build the velocity series from per-sprint KPIs: completed points of
/// `completed` sprints only. The caller supplies KPIs in chronological
/// (start date ascending) order, paired with each sprint's status.
#[must_use]
pub fn velocity_series(kpis: &[(SprintStatus, SprintKpis)]) -> Vec<f64> {
    kpis.iter()
        .filter(|(status, _)| *status == SprintStatus::Completed)
        .map(|(_, kpi)| kpi.completed_points)
        .collect()
}

/// The forecast for the next iteration under the configured policy.
#[must_use]
pub const fn forecast(stats: &VelocityStats, policy: ForecastPolicy) -> f64 {
    match policy {
        ForecastPolicy::Avg => stats.avg,
        ForecastPolicy::Median => stats.median,
        ForecastPolicy::Last5Avg => stats.last5_avg,
        ForecastPolicy::Last5Median => stats.last5_median,
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(series: &[f64]) -> f64 {
    if series.is_empty() {
        0.0
    } else {
        series.iter().sum::<f64>() / series.len() as f64
    }
}

fn median(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let mut sorted = series.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        f64::midpoint(sorted[mid - 1], sorted[mid])
    } else {
        sorted[mid]
    }
}
