//! End-to-end report tests: engine-driven mutations and imported history,
//! read back through the report layer.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::Connection;

use cadence_core::config::{ForecastPolicy, ReviewConfig};
use cadence_core::db::{open_in_memory, query};
use cadence_core::error::Error;
use cadence_core::lifecycle::{self, CreateItem, CreateProject, CreateSprint};
use cadence_core::model::{SprintStatus, Status};
use cadence_core::reviews::{self, RequestReview};
use cadence_metrics::report::{self, KpiFilter};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn store_with_project() -> (Connection, query::Project) {
    let mut conn = open_in_memory().expect("open store");
    let project = lifecycle::create_project(
        &mut conn,
        &CreateProject {
            key_prefix: "PROJ".to_string(),
            name: "Project".to_string(),
        },
    )
    .expect("create project");
    (conn, project)
}

/// Append a historical change entry directly, the way imported data lands
/// in the store.
fn log_change(
    conn: &Connection,
    item_id: &str,
    field: &str,
    old: Option<&str>,
    new: Option<&str>,
    at: DateTime<Utc>,
) {
    conn.execute(
        "INSERT INTO item_changes (item_id, field, old_value, new_value, actor, at_us) \
         VALUES (?1, ?2, ?3, ?4, 'importer', ?5)",
        rusqlite::params![item_id, field, old, new, at.timestamp_micros()],
    )
    .expect("insert change");
}

fn pin_item_sprint(conn: &Connection, item_id: &str, sprint_id: Option<&str>) {
    conn.execute(
        "UPDATE items SET sprint_id = ?1 WHERE item_id = ?2",
        rusqlite::params![sprint_id, item_id],
    )
    .expect("pin sprint");
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, day, hour, 0, 0)
        .single()
        .expect("valid instant")
}

/// A completed historical sprint with one committed item that finished
/// in-window. Returns the sprint id.
fn completed_sprint_with_points(
    conn: &mut Connection,
    project_id: &str,
    key: &str,
    start_day: u32,
    points: f64,
) -> String {
    let sprint = lifecycle::create_sprint(
        conn,
        &CreateSprint {
            project_id: project_id.to_string(),
            key: key.to_string(),
            name: format!("Sprint {key}"),
            start_date: at(start_day, 0),
            end_date: at(start_day + 4, 0),
        },
    )
    .expect("create sprint");
    lifecycle::set_sprint_status(conn, &sprint.id, SprintStatus::Completed)
        .expect("complete sprint");

    let item = lifecycle::create_item(
        conn,
        &CreateItem {
            project_id: project_id.to_string(),
            title: format!("work for {key}"),
            story_points: Some(points),
            ..CreateItem::default()
        },
        "importer",
    )
    .expect("create item");

    pin_item_sprint(conn, &item.id, Some(&sprint.id));
    log_change(
        conn,
        &item.id,
        "sprint",
        None,
        Some(&sprint.id),
        at(start_day, 0) - Duration::days(1),
    );
    log_change(
        conn,
        &item.id,
        "status",
        Some("todo"),
        Some("in-progress"),
        at(start_day + 1, 9),
    );
    log_change(
        conn,
        &item.id,
        "status",
        Some("in-progress"),
        Some("done"),
        at(start_day + 3, 15),
    );

    sprint.id
}

// ---------------------------------------------------------------------------
// End-to-end scenario
// ---------------------------------------------------------------------------

#[test]
fn end_to_end_create_review_complete_and_report() {
    let (mut conn, project) = store_with_project();

    // Create item A in project P: key PROJ-1, status backlog.
    let a = lifecycle::create_item(
        &mut conn,
        &CreateItem {
            project_id: project.id.clone(),
            title: "ship the widget".to_string(),
            story_points: Some(3.0),
            ..CreateItem::default()
        },
        "alice",
    )
    .expect("create item");
    assert_eq!(a.key, "PROJ-1");
    assert_eq!(a.status, Status::Backlog);

    // A sprint containing the completion day.
    let now = Utc::now();
    let sprint = lifecycle::create_sprint(
        &mut conn,
        &CreateSprint {
            project_id: project.id.clone(),
            key: "S1".to_string(),
            name: "Sprint 1".to_string(),
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(5),
        },
    )
    .expect("create sprint");
    lifecycle::set_sprint_status(&mut conn, &sprint.id, SprintStatus::Active)
        .expect("activate sprint");
    lifecycle::assign_sprint(&mut conn, &a.id, Some(&sprint.id), "alice").expect("assign sprint");

    // Move to in-progress: status changes, rank recomputed, activity logged.
    let moved = lifecycle::transition_status(&mut conn, &a.id, Status::InProgress, "alice")
        .expect("start work");
    assert_eq!(moved.status, Status::InProgress);

    // One review, one required approval: done is gated.
    let review = reviews::request_review(
        &mut conn,
        &a.id,
        &RequestReview {
            reviewers: vec!["bob".to_string()],
            required_approvals: Some(1),
            checklist: Vec::new(),
        },
        "alice",
        &ReviewConfig::default(),
    )
    .expect("request review");

    let blocked = lifecycle::transition_status(&mut conn, &a.id, Status::Done, "alice");
    assert!(matches!(blocked, Err(Error::GateBlocked { pending: 1, .. })));

    reviews::approve(&mut conn, &review.id, "bob", Some("lgtm".to_string())).expect("approve");
    let done = lifecycle::transition_status(&mut conn, &a.id, Status::Done, "alice")
        .expect("gate open");
    assert!(done.resolution_date.is_some());

    // The sprint KPIs see the completion.
    let kpis = report::sprint_kpis(&conn, &project.id, &KpiFilter::default()).expect("kpis");
    assert_eq!(kpis.len(), 1);
    assert_eq!(kpis[0].sprint_key, "S1");
    assert_eq!(kpis[0].completed_points, 3.0);
    assert_eq!(kpis[0].throughput_issues, 1);
    // Assigned after the sprint started: added scope, not commitment.
    assert_eq!(kpis[0].committed_points, 0.0);
    assert_eq!(kpis[0].added_scope_points, 3.0);
    assert_eq!(kpis[0].commitment_reliability, 0.0);

    // Burndown and CFD resolve by project/sprint key and cover every day.
    let burndown = report::burndown(&conn, "PROJ", "S1").expect("burndown");
    assert_eq!(burndown.len(), 7);
    assert!(burndown.iter().all(|point| point.actual >= 0.0));

    let cfd = report::cfd(&conn, "PROJ", "S1").expect("cfd");
    assert_eq!(cfd.len(), 7);
    let today = cfd
        .iter()
        .find(|row| row.date == now.date_naive())
        .expect("today's row");
    assert_eq!(today.done, 3.0);
}

#[test]
fn reports_reject_unknown_keys() {
    let (conn, _project) = store_with_project();

    assert!(matches!(
        report::burndown(&conn, "NOPE", "S1"),
        Err(Error::NotFound { kind: "project", .. })
    ));
    assert!(matches!(
        report::cfd(&conn, "PROJ", "S9"),
        Err(Error::NotFound { kind: "sprint", .. })
    ));
    assert!(matches!(
        report::sprint_kpis(&conn, "missing", &KpiFilter::default()),
        Err(Error::NotFound { kind: "project", .. })
    ));
}

// ---------------------------------------------------------------------------
// Historical sprints: KPIs, filters, velocity
// ---------------------------------------------------------------------------

#[test]
fn historical_sprint_kpis_reconstruct_commitment() {
    let (mut conn, project) = store_with_project();
    completed_sprint_with_points(&mut conn, &project.id, "S1", 1, 8.0);

    let kpis = report::sprint_kpis(&conn, &project.id, &KpiFilter::default()).expect("kpis");
    assert_eq!(kpis.len(), 1);
    assert_eq!(kpis[0].committed_points, 8.0);
    assert_eq!(kpis[0].completed_points, 8.0);
    assert_eq!(kpis[0].spillover_points, 0.0);
    assert!((kpis[0].commitment_reliability - 1.0).abs() < f64::EPSILON);
    // in-progress day 2 09:00 -> done day 4 15:00.
    assert!((kpis[0].cycle_time_days - 2.25).abs() < 1e-9);
}

#[test]
fn sprint_filters_narrow_the_report() {
    let (mut conn, project) = store_with_project();
    completed_sprint_with_points(&mut conn, &project.id, "S1", 1, 10.0);
    completed_sprint_with_points(&mut conn, &project.id, "S2", 11, 20.0);

    let only_later = KpiFilter {
        sprints: query::SprintFilter {
            from: Some(at(10, 0)),
            ..query::SprintFilter::default()
        },
        ..KpiFilter::default()
    };
    let kpis = report::sprint_kpis(&conn, &project.id, &only_later).expect("kpis");
    assert_eq!(kpis.len(), 1);
    assert_eq!(kpis[0].sprint_key, "S2");

    let only_planned = KpiFilter {
        sprints: query::SprintFilter {
            status: vec![SprintStatus::Planned],
            ..query::SprintFilter::default()
        },
        ..KpiFilter::default()
    };
    let none = report::sprint_kpis(&conn, &project.id, &only_planned).expect("kpis");
    assert!(none.is_empty());
}

#[test]
fn velocity_rolls_up_completed_sprints_in_order() {
    let (mut conn, project) = store_with_project();
    completed_sprint_with_points(&mut conn, &project.id, "S1", 1, 10.0);
    completed_sprint_with_points(&mut conn, &project.id, "S2", 6, 20.0);
    completed_sprint_with_points(&mut conn, &project.id, "S3", 11, 30.0);

    // An active sprint must not contribute.
    let active = lifecycle::create_sprint(
        &mut conn,
        &CreateSprint {
            project_id: project.id.clone(),
            key: "S4".to_string(),
            name: "Sprint S4".to_string(),
            start_date: at(16, 0),
            end_date: at(20, 0),
        },
    )
    .expect("create sprint");
    lifecycle::set_sprint_status(&mut conn, &active.id, SprintStatus::Active).expect("activate");

    let velocity =
        report::velocity(&conn, &project.id, ForecastPolicy::Last5Median).expect("velocity");
    assert!((velocity.stats.avg - 20.0).abs() < f64::EPSILON);
    assert!((velocity.stats.median - 20.0).abs() < f64::EPSILON);
    assert!((velocity.stats.last5_median - 20.0).abs() < f64::EPSILON);
    assert!((velocity.forecast - 20.0).abs() < f64::EPSILON);
    assert_eq!(velocity.policy, ForecastPolicy::Last5Median);
}

#[test]
fn spillover_and_removed_scope_are_reconstructed() {
    let (mut conn, project) = store_with_project();
    let sprint = lifecycle::create_sprint(
        &mut conn,
        &CreateSprint {
            project_id: project.id.clone(),
            key: "S1".to_string(),
            name: "Sprint 1".to_string(),
            start_date: at(1, 0),
            end_date: at(5, 0),
        },
    )
    .expect("create sprint");
    lifecycle::set_sprint_status(&mut conn, &sprint.id, SprintStatus::Completed)
        .expect("complete");

    // Committed but never finished: pure spillover.
    let stuck = lifecycle::create_item(
        &mut conn,
        &CreateItem {
            project_id: project.id.clone(),
            title: "stuck".to_string(),
            story_points: Some(5.0),
            ..CreateItem::default()
        },
        "importer",
    )
    .expect("create");
    pin_item_sprint(&conn, &stuck.id, Some(&sprint.id));
    log_change(&conn, &stuck.id, "sprint", None, Some(&sprint.id), at(1, 0) - Duration::days(1));

    // Committed, then pulled out mid-sprint: removed scope and spillover.
    let pulled = lifecycle::create_item(
        &mut conn,
        &CreateItem {
            project_id: project.id.clone(),
            title: "pulled".to_string(),
            story_points: Some(3.0),
            ..CreateItem::default()
        },
        "importer",
    )
    .expect("create");
    log_change(&conn, &pulled.id, "sprint", None, Some(&sprint.id), at(1, 0) - Duration::days(1));
    log_change(&conn, &pulled.id, "sprint", Some(&sprint.id), None, at(3, 12));

    let kpis = report::sprint_kpis(&conn, &project.id, &KpiFilter::default()).expect("kpis");
    assert_eq!(kpis.len(), 1);
    assert_eq!(kpis[0].committed_points, 8.0);
    assert_eq!(kpis[0].completed_points, 0.0);
    assert_eq!(kpis[0].spillover_points, 8.0);
    assert_eq!(kpis[0].removed_scope_points, 3.0);
    assert_eq!(kpis[0].commitment_reliability, 0.0);
}
