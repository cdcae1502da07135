//! Report layer: load a sprint scope from the store, delegate to the pure
//! metric functions.
//!
//! Everything here is read-only and lock-free; reports reflect the state
//! as of when they start reading and may run concurrently with mutations.

use rusqlite::Connection;
use serde::Serialize;

use cadence_core::config::ForecastPolicy;
use cadence_core::db::query::{self, SprintFilter};
use cadence_core::error::{Error, Result};
use cadence_core::model::{Sprint, SprintStatus};

use crate::burndown::{self, BurndownPoint};
use crate::cfd::{self, CfdRow};
use crate::kpi::{self, ItemFilter, SprintKpis};
use crate::scope::{ScopedItem, SprintScope};
use crate::velocity::{self, VelocityStats};

/// Combined sprint- and item-level narrowing for KPI queries.
#[derive(Debug, Clone, Default)]
pub struct KpiFilter {
    pub sprints: SprintFilter,
    pub items: ItemFilter,
}

/// Velocity summary plus the policy-driven forecast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityReport {
    pub stats: VelocityStats,
    pub forecast: f64,
    pub policy: ForecastPolicy,
}

/// Load the scope for a sprint: the sprint row plus every item ever
/// associated with it, each with its full change log.
///
/// # Errors
///
/// Returns [`Error::Storage`] if a query fails.
pub fn load_scope(conn: &Connection, sprint: Sprint) -> Result<SprintScope> {
    let items = query::sprint_items_ever(conn, &sprint.id)?
        .into_iter()
        .map(|(item, changes)| ScopedItem { item, changes })
        .collect();
    Ok(SprintScope { sprint, items })
}

fn resolve_sprint(conn: &Connection, project_key: &str, sprint_key: &str) -> Result<Sprint> {
    let project = query::get_project_by_prefix(conn, project_key)?
        .ok_or_else(|| Error::NotFound {
            kind: "project",
            reference: project_key.to_string(),
        })?;
    query::get_sprint_by_key(conn, &project.id, sprint_key)?.ok_or_else(|| Error::NotFound {
        kind: "sprint",
        reference: sprint_key.to_string(),
    })
}

/// Burndown series for a sprint, addressed by project and sprint key.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for unknown keys, [`Error::Storage`] on
/// query failure.
pub fn burndown(conn: &Connection, project_key: &str, sprint_key: &str) -> Result<Vec<BurndownPoint>> {
    let sprint = resolve_sprint(conn, project_key, sprint_key)?;
    let scope = load_scope(conn, sprint)?;
    Ok(burndown::burndown(&scope))
}

/// Cumulative flow diagram for a sprint, addressed by project and sprint
/// key.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for unknown keys, [`Error::Storage`] on
/// query failure.
pub fn cfd(conn: &Connection, project_key: &str, sprint_key: &str) -> Result<Vec<CfdRow>> {
    let sprint = resolve_sprint(conn, project_key, sprint_key)?;
    let scope = load_scope(conn, sprint)?;
    Ok(cfd::cfd(&scope))
}

/// KPI records for a project's sprints, chronological by start date.
/// Sprint-level filters narrow which sprints are reported; item-level
/// filters narrow the items inside each sprint independently.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for an unknown project, [`Error::Storage`]
/// on query failure.
pub fn sprint_kpis(
    conn: &Connection,
    project_id: &str,
    filter: &KpiFilter,
) -> Result<Vec<SprintKpis>> {
    let project = query::get_project(conn, project_id)?.ok_or_else(|| Error::NotFound {
        kind: "project",
        reference: project_id.to_string(),
    })?;

    let sprints = query::list_sprints(conn, &project.id, &filter.sprints)?;
    tracing::debug!(project = %project.key_prefix, sprints = sprints.len(), "computing sprint KPIs");

    let mut reports = Vec::with_capacity(sprints.len());
    for sprint in sprints {
        let scope = load_scope(conn, sprint)?;
        reports.push(kpi::sprint_kpis(&scope, &filter.items));
    }
    Ok(reports)
}

/// Velocity rollup for a project: completed sprints' completed points in
/// chronological order, summarized and forecast under `policy`.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for an unknown project, [`Error::Storage`]
/// on query failure.
pub fn velocity(conn: &Connection, project_id: &str, policy: ForecastPolicy) -> Result<VelocityReport> {
    let completed_only = SprintFilter {
        status: vec![SprintStatus::Completed],
        ..SprintFilter::default()
    };
    let filter = KpiFilter {
        sprints: completed_only,
        items: ItemFilter::default(),
    };

    let kpis = sprint_kpis(conn, project_id, &filter)?;
    let series: Vec<f64> = kpis.iter().map(|kpi| kpi.completed_points).collect();

    let stats = velocity::to_velocity_stats(&series);
    let forecast = velocity::forecast(&stats, policy);
    Ok(VelocityReport {
        stats,
        forecast,
        policy,
    })
}
