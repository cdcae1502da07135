//! Typed read helpers for the store.
//!
//! All functions take a shared `&Connection`, return typed structs (never
//! raw rows), and exclude soft-deleted rows unless told otherwise.
//! Analytics entry points are read-only and take no locks; they see the
//! state as of when they start reading.

use rusqlite::{Connection, Row, params, types::Type};
use std::str::FromStr;

use super::{datetime_from_us, us_from_datetime};
use crate::changelog::ChangeEntry;
use crate::error::Result;
use crate::model::{
    ChecklistItem, ItemType, Priority, Resolution, Review, ReviewStatus, Reviewer, Sprint,
    SprintStatus, Status, WorkItem,
};
use crate::rank::Rank;
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// The project aggregate: key prefix plus the issue counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub key_prefix: String,
    pub name: String,
    pub issue_counter: i64,
}

/// Sprint-level narrowing for KPI queries: date bounds apply to the sprint
/// start, `status` is an OR-set (empty = any).
#[derive(Debug, Clone, Default)]
pub struct SprintFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub status: Vec<SprintStatus>,
}

const ITEM_COLUMNS: &str = "item_id, project_id, key, title, description, item_type, status, \
     priority, rank, story_points, sprint_id, due_at_us, parent_id, epic_id, \
     assignee, labels_json, resolution, resolution_at_us, created_at_us, deleted_at_us";

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn text_conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error))
}

#[allow(clippy::similar_names)]
fn row_to_item(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    let item_type: String = row.get(5)?;
    let status: String = row.get(6)?;
    let priority: String = row.get(7)?;
    let rank: String = row.get(8)?;
    let labels_json: String = row.get(15)?;
    let resolution: String = row.get(16)?;

    let due_at_us: Option<i64> = row.get(11)?;
    let resolution_at_us: Option<i64> = row.get(17)?;
    let created_at_us: i64 = row.get(18)?;
    let deleted_at_us: Option<i64> = row.get(19)?;

    Ok(WorkItem {
        id: row.get(0)?,
        project_id: row.get(1)?,
        key: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        item_type: ItemType::from_str(&item_type).map_err(|e| text_conversion_error(5, e))?,
        status: Status::from_str(&status).map_err(|e| text_conversion_error(6, e))?,
        priority: Priority::from_str(&priority).map_err(|e| text_conversion_error(7, e))?,
        rank: Rank::parse(rank).map_err(|e| text_conversion_error(8, e))?,
        story_points: row.get(9)?,
        sprint_id: row.get(10)?,
        due_date: due_at_us.map(|us| datetime_from_us(11, us)).transpose()?,
        parent_id: row.get(12)?,
        epic_id: row.get(13)?,
        linked_ids: Vec::new(),
        assignee: row.get(14)?,
        labels: serde_json::from_str(&labels_json).map_err(|e| text_conversion_error(15, e))?,
        resolution: Resolution::from_str(&resolution).map_err(|e| text_conversion_error(16, e))?,
        resolution_date: resolution_at_us
            .map(|us| datetime_from_us(17, us))
            .transpose()?,
        created_at: datetime_from_us(18, created_at_us)?,
        deleted_at: deleted_at_us.map(|us| datetime_from_us(19, us)).transpose()?,
    })
}

fn row_to_sprint(row: &Row<'_>) -> rusqlite::Result<Sprint> {
    let status: String = row.get(6)?;
    Ok(Sprint {
        id: row.get(0)?,
        project_id: row.get(1)?,
        key: row.get(2)?,
        name: row.get(3)?,
        start_date: datetime_from_us(4, row.get(4)?)?,
        end_date: datetime_from_us(5, row.get(5)?)?,
        status: SprintStatus::from_str(&status).map_err(|e| text_conversion_error(6, e))?,
    })
}

fn row_to_review(row: &Row<'_>) -> rusqlite::Result<Review> {
    let reviewers_json: String = row.get(4)?;
    let checklist_json: String = row.get(5)?;
    let status: String = row.get(6)?;
    let deleted_at_us: Option<i64> = row.get(8)?;

    let reviewers: Vec<Reviewer> =
        serde_json::from_str(&reviewers_json).map_err(|e| text_conversion_error(4, e))?;
    let checklist: Vec<ChecklistItem> =
        serde_json::from_str(&checklist_json).map_err(|e| text_conversion_error(5, e))?;

    Ok(Review {
        id: row.get(0)?,
        item_id: row.get(1)?,
        requested_by: row.get(2)?,
        required_approvals: row.get(3)?,
        reviewers,
        checklist,
        status: ReviewStatus::from_str(&status).map_err(|e| text_conversion_error(6, e))?,
        created_at: datetime_from_us(7, row.get(7)?)?,
        deleted_at: deleted_at_us.map(|us| datetime_from_us(8, us)).transpose()?,
    })
}

fn row_to_change(row: &Row<'_>) -> rusqlite::Result<ChangeEntry> {
    Ok(ChangeEntry {
        item_id: row.get(0)?,
        field: row.get(1)?,
        old_value: row.get(2)?,
        new_value: row.get(3)?,
        actor: row.get(4)?,
        at: datetime_from_us(5, row.get(5)?)?,
    })
}

fn attach_links(conn: &Connection, item: &mut WorkItem) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT linked_item_id FROM item_links WHERE item_id = ?1 ORDER BY linked_item_id",
    )?;
    let rows = stmt.query_map(params![item.id], |row| row.get::<_, String>(0))?;
    item.linked_ids = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Fetch a project by id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn get_project(conn: &Connection, project_id: &str) -> Result<Option<Project>> {
    let result = conn.query_row(
        "SELECT project_id, key_prefix, name, issue_counter FROM projects WHERE project_id = ?1",
        params![project_id],
        |row| {
            Ok(Project {
                id: row.get(0)?,
                key_prefix: row.get(1)?,
                name: row.get(2)?,
                issue_counter: row.get(3)?,
            })
        },
    );
    match result {
        Ok(project) => Ok(Some(project)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fetch a project by its key prefix (the `PROJ` in `PROJ-42`).
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn get_project_by_prefix(conn: &Connection, key_prefix: &str) -> Result<Option<Project>> {
    let result = conn.query_row(
        "SELECT project_id, key_prefix, name, issue_counter FROM projects WHERE key_prefix = ?1",
        params![key_prefix],
        |row| {
            Ok(Project {
                id: row.get(0)?,
                key_prefix: row.get(1)?,
                name: row.get(2)?,
                issue_counter: row.get(3)?,
            })
        },
    );
    match result {
        Ok(project) => Ok(Some(project)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Fetch a single live item by id, with its links attached.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn get_item(conn: &Connection, item_id: &str) -> Result<Option<WorkItem>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE item_id = ?1 AND deleted_at_us IS NULL");
    fetch_one_item(conn, &sql, params![item_id])
}

/// Fetch a single item by id including soft-deleted rows.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn get_item_any(conn: &Connection, item_id: &str) -> Result<Option<WorkItem>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE item_id = ?1");
    fetch_one_item(conn, &sql, params![item_id])
}

/// Fetch a live item by its human key within a project.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn get_item_by_key(conn: &Connection, project_id: &str, key: &str) -> Result<Option<WorkItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM items \
         WHERE project_id = ?1 AND key = ?2 AND deleted_at_us IS NULL"
    );
    fetch_one_item(conn, &sql, params![project_id, key])
}

/// Resolve a key-or-id reference to a live item within a project.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if a query fails.
pub fn resolve_item(
    conn: &Connection,
    project_id: &str,
    reference: &str,
) -> Result<Option<WorkItem>> {
    if let Some(item) = get_item(conn, reference)? {
        if item.project_id == project_id {
            return Ok(Some(item));
        }
    }
    get_item_by_key(conn, project_id, reference)
}

fn fetch_one_item(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<WorkItem>> {
    let mut stmt = conn.prepare(sql)?;
    let result = stmt.query_row(params, row_to_item);
    match result {
        Ok(mut item) => {
            attach_links(conn, &mut item)?;
            Ok(Some(item))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List the live items of one status column, ordered by rank ascending.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn list_column(conn: &Connection, project_id: &str, status: Status) -> Result<Vec<WorkItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM items \
         WHERE project_id = ?1 AND status = ?2 AND deleted_at_us IS NULL \
         ORDER BY rank ASC, item_id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![project_id, status.as_str()], row_to_item)?;

    let mut items = Vec::new();
    for row in rows {
        let mut item = row?;
        attach_links(conn, &mut item)?;
        items.push(item);
    }
    Ok(items)
}

/// The `(item_id, rank)` pairs of one column in rank order. Lightweight
/// variant of [`list_column`] for rank maintenance.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn column_ranks(
    conn: &Connection,
    project_id: &str,
    status: Status,
) -> Result<Vec<(String, Rank)>> {
    let mut stmt = conn.prepare(
        "SELECT item_id, rank FROM items \
         WHERE project_id = ?1 AND status = ?2 AND deleted_at_us IS NULL \
         ORDER BY rank ASC, item_id ASC",
    )?;
    let rows = stmt.query_map(params![project_id, status.as_str()], |row| {
        let id: String = row.get(0)?;
        let raw: String = row.get(1)?;
        let rank = Rank::parse(raw).map_err(|e| text_conversion_error(1, e))?;
        Ok((id, rank))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ---------------------------------------------------------------------------
// Change log
// ---------------------------------------------------------------------------

/// All change entries for an item in insertion order. Consumers must not
/// rely on this ordering; the reconstructor re-sorts by timestamp.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn changes_for_item(conn: &Connection, item_id: &str) -> Result<Vec<ChangeEntry>> {
    let mut stmt = conn.prepare(
        "SELECT item_id, field, old_value, new_value, actor, at_us \
         FROM item_changes WHERE item_id = ?1 ORDER BY change_id ASC",
    )?;
    let rows = stmt.query_map(params![item_id], row_to_change)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ---------------------------------------------------------------------------
// Sprints
// ---------------------------------------------------------------------------

/// Fetch a sprint by id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn get_sprint(conn: &Connection, sprint_id: &str) -> Result<Option<Sprint>> {
    let result = conn.query_row(
        "SELECT sprint_id, project_id, key, name, start_at_us, end_at_us, status \
         FROM sprints WHERE sprint_id = ?1",
        params![sprint_id],
        row_to_sprint,
    );
    match result {
        Ok(sprint) => Ok(Some(sprint)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fetch a sprint by its project-scoped key.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn get_sprint_by_key(conn: &Connection, project_id: &str, key: &str) -> Result<Option<Sprint>> {
    let result = conn.query_row(
        "SELECT sprint_id, project_id, key, name, start_at_us, end_at_us, status \
         FROM sprints WHERE project_id = ?1 AND key = ?2",
        params![project_id, key],
        row_to_sprint,
    );
    match result {
        Ok(sprint) => Ok(Some(sprint)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List a project's sprints matching the filter, ordered by start date
/// ascending (the order velocity series are built in).
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn list_sprints(
    conn: &Connection,
    project_id: &str,
    filter: &SprintFilter,
) -> Result<Vec<Sprint>> {
    let mut stmt = conn.prepare(
        "SELECT sprint_id, project_id, key, name, start_at_us, end_at_us, status \
         FROM sprints WHERE project_id = ?1 ORDER BY start_at_us ASC, sprint_id ASC",
    )?;
    let rows = stmt.query_map(params![project_id], row_to_sprint)?;

    let mut sprints = Vec::new();
    for row in rows {
        let sprint = row?;
        if let Some(from) = filter.from {
            if sprint.start_date < from {
                continue;
            }
        }
        if let Some(to) = filter.to {
            if sprint.start_date > to {
                continue;
            }
        }
        if !filter.status.is_empty() && !filter.status.contains(&sprint.status) {
            continue;
        }
        sprints.push(sprint);
    }
    Ok(sprints)
}

/// Load the items *ever* associated with a sprint — current membership OR
/// any `sprint` change entry assigning it — together with each item's full
/// change log. This is the input set for all sprint metrics.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if a query fails.
pub fn sprint_items_ever(
    conn: &Connection,
    sprint_id: &str,
) -> Result<Vec<(WorkItem, Vec<ChangeEntry>)>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM items i \
         WHERE i.deleted_at_us IS NULL AND (i.sprint_id = ?1 OR EXISTS (\
             SELECT 1 FROM item_changes c \
             WHERE c.item_id = i.item_id AND c.field = 'sprint' AND c.new_value = ?1)) \
         ORDER BY i.key ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![sprint_id], row_to_item)?;

    let mut scope = Vec::new();
    for row in rows {
        let mut item = row?;
        attach_links(conn, &mut item)?;
        let changes = changes_for_item(conn, &item.id)?;
        scope.push((item, changes));
    }
    Ok(scope)
}

// ---------------------------------------------------------------------------
// Reviews
// ---------------------------------------------------------------------------

/// Fetch a live review by id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn get_review(conn: &Connection, review_id: &str) -> Result<Option<Review>> {
    let result = conn.query_row(
        "SELECT review_id, item_id, requested_by, required_approvals, reviewers_json, \
         checklist_json, status, created_at_us, deleted_at_us \
         FROM reviews WHERE review_id = ?1 AND deleted_at_us IS NULL",
        params![review_id],
        row_to_review,
    );
    match result {
        Ok(review) => Ok(Some(review)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All live reviews attached to an item.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn reviews_for_item(conn: &Connection, item_id: &str) -> Result<Vec<Review>> {
    let mut stmt = conn.prepare(
        "SELECT review_id, item_id, requested_by, required_approvals, reviewers_json, \
         checklist_json, status, created_at_us, deleted_at_us \
         FROM reviews WHERE item_id = ?1 AND deleted_at_us IS NULL \
         ORDER BY created_at_us ASC",
    )?;
    let rows = stmt.query_map(params![item_id], row_to_review)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Count an item's reviews that still block the done transition, split
/// into `(pending, changes_requested)`.
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the query fails.
pub fn outstanding_review_counts(conn: &Connection, item_id: &str) -> Result<(usize, usize)> {
    let pending: usize = conn.query_row(
        "SELECT COUNT(*) FROM reviews \
         WHERE item_id = ?1 AND status = ?2 AND deleted_at_us IS NULL",
        params![item_id, ReviewStatus::Pending.as_str()],
        |row| row.get(0),
    )?;
    let changes_requested: usize = conn.query_row(
        "SELECT COUNT(*) FROM reviews \
         WHERE item_id = ?1 AND status = ?2 AND deleted_at_us IS NULL",
        params![item_id, ReviewStatus::ChangesRequested.as_str()],
        |row| row.get(0),
    )?;
    Ok((pending, changes_requested))
}

// ---------------------------------------------------------------------------
// Shared write helper
// ---------------------------------------------------------------------------

/// Append one change entry. Callers run this inside their transaction so
/// a failed mutation never leaves an orphaned entry (and vice versa).
///
/// # Errors
///
/// Returns [`crate::error::Error::Storage`] if the insert fails.
pub(crate) fn append_change(conn: &Connection, entry: &ChangeEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO item_changes (item_id, field, old_value, new_value, actor, at_us) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.item_id,
            entry.field,
            entry.old_value,
            entry.new_value,
            entry.actor,
            us_from_datetime(entry.at),
        ],
    )?;
    Ok(())
}
