//! The state-transition engine.
//!
//! Every operation here is one atomic unit: it opens a `BEGIN IMMEDIATE`
//! transaction, mutates the live item, appends the matching change
//! entries, and commits — or rolls the whole thing back. Two concurrent
//! writers serialize on the store's write lock, so key allocation and
//! rank computation never observe stale neighbors.
//!
//! Renormalization is the one exception to "everything in the
//! transaction": it is maintenance, checked after the user-facing commit
//! and run best-effort in its own transaction. A failure there is logged
//! and swallowed, never surfaced to the caller who triggered the move.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use uuid::Uuid;

use crate::changelog::{ChangeEntry, fields};
use crate::db::query::{self, Project};
use crate::db::us_from_datetime;
use crate::error::{Error, Result};
use crate::model::{ItemType, Priority, Resolution, Status, WorkItem};
use crate::rank::{self, Rank, RankError};

/// Ancestor-walk bound for `set_parent`. A safety valve against runaway
/// chains, not a business rule.
pub const MAX_PARENT_DEPTH: usize = 10;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Input for [`create_project`].
#[derive(Debug, Clone)]
pub struct CreateProject {
    pub key_prefix: String,
    pub name: String,
}

/// Input for [`create_item`]. `epic` and `parent` accept a key or an id.
#[derive(Debug, Clone, Default)]
pub struct CreateItem {
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub item_type: Option<ItemType>,
    pub priority: Option<Priority>,
    pub story_points: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    pub epic: Option<String>,
    pub parent: Option<String>,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
}

/// Destination of a [`move_item`] call. `after`/`before` name the neighbor
/// items (by id) the caller wants to land next to; both absent appends to
/// the end of the target column.
#[derive(Debug, Clone)]
pub struct MoveTo {
    pub status: Status,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl MoveTo {
    /// Append to the end of `status`.
    #[must_use]
    pub const fn end_of(status: Status) -> Self {
        Self {
            status,
            after: None,
            before: None,
        }
    }
}

/// Field updates for [`update_item`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub story_points: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub labels: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Transaction plumbing
// ---------------------------------------------------------------------------

fn immediate_tx(conn: &mut Connection) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(Error::from_sqlite)
}

fn commit(tx: Transaction<'_>) -> Result<()> {
    tx.commit().map_err(Error::from_sqlite)
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Create a project with a zeroed issue counter.
///
/// # Errors
///
/// Fails with [`Error::Validation`] on an empty or non-alphanumeric key
/// prefix, [`Error::Storage`] on a duplicate prefix.
pub fn create_project(conn: &mut Connection, input: &CreateProject) -> Result<Project> {
    let prefix = input.key_prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::validation(format!(
            "project key prefix must be non-empty alphanumeric, got '{}'",
            input.key_prefix
        )));
    }

    let project = Project {
        id: Uuid::new_v4().to_string(),
        key_prefix: prefix.to_string(),
        name: input.name.clone(),
        issue_counter: 0,
    };

    let tx = immediate_tx(conn)?;
    tx.execute(
        "INSERT INTO projects (project_id, key_prefix, name, issue_counter) \
         VALUES (?1, ?2, ?3, 0)",
        params![project.id, project.key_prefix, project.name],
    )
    .map_err(Error::from_sqlite)?;
    commit(tx)?;

    Ok(project)
}

// ---------------------------------------------------------------------------
// Item creation
// ---------------------------------------------------------------------------

/// Create a work item: allocate the next project-scoped number atomically,
/// derive the key, assign an initial rank at the end of the backlog
/// column, and log the creation.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] for an unknown project or unresolvable
/// epic/parent reference, [`Error::Validation`] for type-mismatched
/// references or negative points, [`Error::Conflict`] on write contention.
pub fn create_item(conn: &mut Connection, input: &CreateItem, actor: &str) -> Result<WorkItem> {
    validate_points(input.story_points)?;
    let now = Utc::now();

    let tx = immediate_tx(conn)?;

    let project = query::get_project(&tx, &input.project_id)?
        .ok_or_else(|| Error::not_found("project", &input.project_id))?;

    let item_type = input.item_type.unwrap_or(ItemType::Task);

    let epic_id = match &input.epic {
        Some(reference) => Some(resolve_epic(&tx, &project.id, reference, item_type)?),
        None => None,
    };
    let parent_id = match &input.parent {
        Some(reference) => {
            let parent = query::resolve_item(&tx, &project.id, reference)?
                .ok_or_else(|| Error::not_found("parent", reference))?;
            if parent.item_type == ItemType::Epic {
                return Err(Error::validation(format!(
                    "parent '{}' is an epic; epics cannot be parents, use the epic link",
                    parent.key
                )));
            }
            if item_type == ItemType::Epic {
                return Err(Error::validation(
                    "an epic cannot have a parent".to_string(),
                ));
            }
            Some(parent.id)
        }
        None => None,
    };

    // Atomic increment-and-fetch; two concurrent creates serialize on the
    // write lock and never see the same number.
    let number: i64 = tx
        .query_row(
            "UPDATE projects SET issue_counter = issue_counter + 1 \
             WHERE project_id = ?1 RETURNING issue_counter",
            params![project.id],
            |row| row.get(0),
        )
        .map_err(Error::from_sqlite)?;
    let key = format!("{}-{number}", project.key_prefix);

    let status = Status::Backlog;
    let item_rank = next_rank_at_end(&tx, &project.id, status, None)?;

    let item = WorkItem {
        id: Uuid::new_v4().to_string(),
        project_id: project.id.clone(),
        key: key.clone(),
        title: input.title.clone(),
        description: input.description.clone(),
        item_type,
        status,
        priority: input.priority.unwrap_or_default(),
        rank: item_rank,
        story_points: input.story_points,
        sprint_id: None,
        due_date: input.due_date,
        parent_id,
        epic_id,
        linked_ids: Vec::new(),
        assignee: input.assignee.clone(),
        labels: input.labels.clone(),
        resolution: Resolution::Unresolved,
        resolution_date: None,
        created_at: now,
        deleted_at: None,
    };

    insert_item(&tx, &item)?;
    query::append_change(
        &tx,
        &ChangeEntry::new(&item.id, fields::CREATED, None, Some(key), actor, now),
    )?;

    commit(tx)?;
    tracing::info!(item = %item.key, project = %project.key_prefix, "created work item");
    Ok(item)
}

fn insert_item(tx: &Transaction<'_>, item: &WorkItem) -> Result<()> {
    let labels_json = serde_json::to_string(&item.labels)
        .map_err(|e| Error::validation(format!("labels are not serializable: {e}")))?;
    tx.execute(
        "INSERT INTO items (item_id, project_id, key, title, description, item_type, status, \
         priority, rank, story_points, sprint_id, due_at_us, parent_id, epic_id, assignee, \
         labels_json, resolution, resolution_at_us, created_at_us, deleted_at_us) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?19, ?20)",
        params![
            item.id,
            item.project_id,
            item.key,
            item.title,
            item.description,
            item.item_type.to_string(),
            item.status.as_str(),
            item.priority.to_string(),
            item.rank.as_str(),
            item.story_points,
            item.sprint_id,
            item.due_date.map(us_from_datetime),
            item.parent_id,
            item.epic_id,
            item.assignee,
            labels_json,
            item.resolution.as_str(),
            item.resolution_date.map(us_from_datetime),
            us_from_datetime(item.created_at),
            item.deleted_at.map(us_from_datetime),
        ],
    )
    .map_err(Error::from_sqlite)?;
    Ok(())
}

fn validate_points(points: Option<f64>) -> Result<()> {
    if let Some(value) = points {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::validation(format!(
                "story points must be a non-negative number, got {value}"
            )));
        }
    }
    Ok(())
}

fn resolve_epic(
    tx: &Transaction<'_>,
    project_id: &str,
    reference: &str,
    item_type: ItemType,
) -> Result<String> {
    if item_type == ItemType::Epic {
        return Err(Error::validation(
            "an epic cannot belong to another epic".to_string(),
        ));
    }
    let epic = query::resolve_item(tx, project_id, reference)?
        .ok_or_else(|| Error::not_found("epic", reference))?;
    if epic.item_type != ItemType::Epic {
        return Err(Error::validation(format!(
            "'{}' is a {}, not an epic",
            epic.key, epic.item_type
        )));
    }
    Ok(epic.id)
}

// ---------------------------------------------------------------------------
// Moves and status transitions
// ---------------------------------------------------------------------------

/// Move an item to a new status column and/or position.
///
/// Neighbor ranks are resolved inside the same transaction that writes the
/// new rank, so concurrent moves cannot compute overlapping positions from
/// stale reads. Entering the terminal column is gated on outstanding
/// reviews; entering/leaving it drives the resolution automation. After
/// the commit the affected column is checked for fragmentation and
/// renormalized best-effort.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] for unknown item/neighbors,
/// [`Error::GateBlocked`] when reviews are outstanding,
/// [`Error::Validation`] for neighbors outside the target column, and
/// [`Error::Conflict`] on write contention.
pub fn move_item(
    conn: &mut Connection,
    item_id: &str,
    dest: &MoveTo,
    actor: &str,
) -> Result<WorkItem> {
    let now = Utc::now();
    let tx = immediate_tx(conn)?;

    let mut item =
        query::get_item(&tx, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;

    let entering_done = dest.status.is_terminal() && !item.status.is_terminal();
    let leaving_done = item.status.is_terminal() && !dest.status.is_terminal();

    if entering_done {
        ensure_review_gate_open(&tx, &item)?;
    }

    let new_rank = compute_move_rank(&tx, &item, dest)?;

    let old_status = item.status;
    let old_rank = item.rank.clone();

    item.status = dest.status;
    item.rank = new_rank;

    if entering_done && item.resolution == Resolution::Unresolved {
        item.resolution = Resolution::Done;
        item.resolution_date = Some(now);
        query::append_change(
            &tx,
            &ChangeEntry::new(
                &item.id,
                fields::RESOLUTION,
                Some(Resolution::Unresolved.to_string()),
                Some(Resolution::Done.to_string()),
                actor,
                now,
            ),
        )?;
    } else if leaving_done {
        let old_resolution = item.resolution;
        item.resolution = Resolution::Unresolved;
        item.resolution_date = None;
        query::append_change(
            &tx,
            &ChangeEntry::new(
                &item.id,
                fields::RESOLUTION,
                Some(old_resolution.to_string()),
                Some(Resolution::Unresolved.to_string()),
                actor,
                now,
            ),
        )?;
    }

    tx.execute(
        "UPDATE items SET status = ?1, rank = ?2, resolution = ?3, resolution_at_us = ?4 \
         WHERE item_id = ?5",
        params![
            item.status.as_str(),
            item.rank.as_str(),
            item.resolution.as_str(),
            item.resolution_date.map(us_from_datetime),
            item.id,
        ],
    )
    .map_err(Error::from_sqlite)?;

    if old_status != item.status {
        query::append_change(
            &tx,
            &ChangeEntry::new(
                &item.id,
                fields::STATUS,
                Some(old_status.to_string()),
                Some(item.status.to_string()),
                actor,
                now,
            ),
        )?;
    }
    query::append_change(
        &tx,
        &ChangeEntry::new(
            &item.id,
            fields::RANK,
            Some(old_rank.to_string()),
            Some(item.rank.to_string()),
            actor,
            now,
        ),
    )?;

    commit(tx)?;
    tracing::debug!(item = %item.key, from = %old_status, to = %item.status, "moved work item");

    // Maintenance, not a precondition: the move above already succeeded.
    maybe_renormalize_column(
        conn,
        &item.project_id,
        item.status,
        rank::DEFAULT_MAX_KEY_LEN,
    );

    Ok(item)
}

/// Status-only transition used by generic field updates. Appends to the
/// end of the target column.
///
/// # Errors
///
/// As [`move_item`], plus [`Error::Validation`] when the item is already
/// in the target status.
pub fn transition_status(
    conn: &mut Connection,
    item_id: &str,
    to: Status,
    actor: &str,
) -> Result<WorkItem> {
    {
        let item =
            query::get_item(conn, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;
        if item.status == to {
            return Err(Error::validation(format!(
                "item '{}' is already in status {to}",
                item.key
            )));
        }
    }
    move_item(conn, item_id, &MoveTo::end_of(to), actor)
}

fn ensure_review_gate_open(tx: &Transaction<'_>, item: &WorkItem) -> Result<()> {
    let (pending, changes_requested) = query::outstanding_review_counts(tx, &item.id)?;
    if pending > 0 || changes_requested > 0 {
        return Err(Error::GateBlocked {
            item: item.key.clone(),
            pending,
            changes_requested,
        });
    }
    Ok(())
}

/// Rank for an insert at the end of a column, excluding `exclude_id` (the
/// item being moved, when it is already in that column).
fn next_rank_at_end(
    tx: &Transaction<'_>,
    project_id: &str,
    status: Status,
    exclude_id: Option<&str>,
) -> Result<Rank> {
    let last = last_rank(tx, project_id, status, exclude_id)?;
    match last {
        Some(rank) => Ok(rank::between(Some(&rank), None)?),
        None => Ok(rank::initial()),
    }
}

fn last_rank(
    tx: &Transaction<'_>,
    project_id: &str,
    status: Status,
    exclude_id: Option<&str>,
) -> Result<Option<Rank>> {
    let raw: Option<String> = tx
        .query_row(
            "SELECT rank FROM items \
             WHERE project_id = ?1 AND status = ?2 AND deleted_at_us IS NULL \
             AND item_id != ?3 \
             ORDER BY rank DESC LIMIT 1",
            params![project_id, status.as_str(), exclude_id.unwrap_or("")],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .map_err(Error::from_sqlite)?;
    raw.map(Rank::parse).transpose().map_err(Into::into)
}

fn neighbor_rank(
    tx: &Transaction<'_>,
    project_id: &str,
    status: Status,
    pivot: &Rank,
    exclude_id: &str,
    direction_after: bool,
) -> Result<Option<Rank>> {
    let sql = if direction_after {
        "SELECT rank FROM items \
         WHERE project_id = ?1 AND status = ?2 AND deleted_at_us IS NULL \
         AND rank > ?3 AND item_id != ?4 \
         ORDER BY rank ASC LIMIT 1"
    } else {
        "SELECT rank FROM items \
         WHERE project_id = ?1 AND status = ?2 AND deleted_at_us IS NULL \
         AND rank < ?3 AND item_id != ?4 \
         ORDER BY rank DESC LIMIT 1"
    };
    let raw: Option<String> = tx
        .query_row(
            sql,
            params![project_id, status.as_str(), pivot.as_str(), exclude_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .map_err(Error::from_sqlite)?;
    raw.map(Rank::parse).transpose().map_err(Into::into)
}

fn anchor_in_column(
    tx: &Transaction<'_>,
    item: &WorkItem,
    dest: &MoveTo,
    anchor_id: &str,
) -> Result<WorkItem> {
    let anchor =
        query::get_item(tx, anchor_id)?.ok_or_else(|| Error::not_found("item", anchor_id))?;
    if anchor.project_id != item.project_id || anchor.status != dest.status {
        return Err(Error::validation(format!(
            "anchor '{}' is not in the target column {}",
            anchor.key, dest.status
        )));
    }
    if anchor.id == item.id {
        return Err(Error::validation(
            "an item cannot be positioned relative to itself".to_string(),
        ));
    }
    Ok(anchor)
}

fn compute_move_rank(tx: &Transaction<'_>, item: &WorkItem, dest: &MoveTo) -> Result<Rank> {
    match try_compute_move_rank(tx, item, dest)? {
        Ok(new_rank) => Ok(new_rank),
        Err(exhausted) => {
            // The gap between the requested neighbors is exhausted.
            // Renormalize the target column inside this same transaction
            // so the move still succeeds, then recompute against the
            // fresh keys.
            tracing::info!(item = %item.key, error = %exhausted,
                "rank space exhausted; renormalizing in-transaction");
            renormalize_column_tx(tx, &item.project_id, dest.status)?;
            try_compute_move_rank(tx, item, dest)?.map_err(|error| {
                Error::Conflict(format!(
                    "rank space still exhausted after renormalization: {error}"
                ))
            })
        }
    }
}

/// Outer error: lookup/validation failure. Inner error: the key space has
/// no room between the requested neighbors.
fn try_compute_move_rank(
    tx: &Transaction<'_>,
    item: &WorkItem,
    dest: &MoveTo,
) -> Result<std::result::Result<Rank, RankError>> {
    let (prev, next) = match (&dest.after, &dest.before) {
        (Some(after_id), Some(before_id)) => {
            let after = anchor_in_column(tx, item, dest, after_id)?;
            let before = anchor_in_column(tx, item, dest, before_id)?;
            (Some(after.rank), Some(before.rank))
        }
        (Some(after_id), None) => {
            let after = anchor_in_column(tx, item, dest, after_id)?;
            let next =
                neighbor_rank(tx, &item.project_id, dest.status, &after.rank, &item.id, true)?;
            (Some(after.rank), next)
        }
        (None, Some(before_id)) => {
            let before = anchor_in_column(tx, item, dest, before_id)?;
            let prev =
                neighbor_rank(tx, &item.project_id, dest.status, &before.rank, &item.id, false)?;
            (prev, Some(before.rank))
        }
        (None, None) => {
            let last = last_rank(tx, &item.project_id, dest.status, Some(&item.id))?;
            (last, None)
        }
    };

    match (prev.as_ref(), next.as_ref()) {
        (None, None) => Ok(Ok(rank::initial())),
        (p, n) => Ok(rank::between(p, n)),
    }
}

// ---------------------------------------------------------------------------
// Renormalization
// ---------------------------------------------------------------------------

fn renormalize_column_tx(tx: &Transaction<'_>, project_id: &str, status: Status) -> Result<()> {
    let current = query::column_ranks(tx, project_id, status)?;
    let fresh = rank::renormalize(current.len());
    for ((item_id, _), new_rank) in current.iter().zip(fresh) {
        tx.execute(
            "UPDATE items SET rank = ?1 WHERE item_id = ?2",
            params![new_rank.as_str(), item_id],
        )
        .map_err(Error::from_sqlite)?;
    }
    tracing::info!(project = project_id, status = %status, items = current.len(),
        "renormalized column ranks");
    Ok(())
}

/// Check a column for fragmentation and renormalize it when needed.
///
/// Best-effort maintenance: any failure is logged and swallowed. Safe to
/// retry or skip; the next fragmented insert will trigger it again.
pub fn maybe_renormalize_column(
    conn: &mut Connection,
    project_id: &str,
    status: Status,
    max_key_len: usize,
) {
    let result = (|| -> Result<bool> {
        let ranks: Vec<Rank> = query::column_ranks(conn, project_id, status)?
            .into_iter()
            .map(|(_, rank)| rank)
            .collect();
        if !rank::needs_renormalization(&ranks, max_key_len) {
            return Ok(false);
        }
        let tx = immediate_tx(conn)?;
        renormalize_column_tx(&tx, project_id, status)?;
        commit(tx)?;
        Ok(true)
    })();

    match result {
        Ok(_) => {}
        Err(error) => {
            tracing::warn!(project = project_id, status = %status, %error,
                "column renormalization failed; will retry on a later move");
        }
    }
}

// ---------------------------------------------------------------------------
// Sprints
// ---------------------------------------------------------------------------

/// Input for [`create_sprint`].
#[derive(Debug, Clone)]
pub struct CreateSprint {
    pub project_id: String,
    pub key: String,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Create a sprint in `planned` state.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] for an unknown project,
/// [`Error::Validation`] for an inverted date range, and
/// [`Error::Storage`] on a duplicate sprint key.
pub fn create_sprint(conn: &mut Connection, input: &CreateSprint) -> Result<crate::model::Sprint> {
    let sprint = crate::model::Sprint {
        id: Uuid::new_v4().to_string(),
        project_id: input.project_id.clone(),
        key: input.key.clone(),
        name: input.name.clone(),
        start_date: input.start_date,
        end_date: input.end_date,
        status: crate::model::SprintStatus::Planned,
    };
    sprint.validate()?;

    let tx = immediate_tx(conn)?;
    query::get_project(&tx, &sprint.project_id)?
        .ok_or_else(|| Error::not_found("project", &sprint.project_id))?;

    tx.execute(
        "INSERT INTO sprints (sprint_id, project_id, key, name, start_at_us, end_at_us, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            sprint.id,
            sprint.project_id,
            sprint.key,
            sprint.name,
            us_from_datetime(sprint.start_date),
            us_from_datetime(sprint.end_date),
            sprint.status.as_str(),
        ],
    )
    .map_err(Error::from_sqlite)?;
    commit(tx)?;

    Ok(sprint)
}

/// Advance a sprint's lifecycle state. Velocity rollups only consider
/// sprints that have reached `completed`.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] for an unknown sprint.
pub fn set_sprint_status(
    conn: &mut Connection,
    sprint_id: &str,
    status: crate::model::SprintStatus,
) -> Result<crate::model::Sprint> {
    let tx = immediate_tx(conn)?;
    let mut sprint =
        query::get_sprint(&tx, sprint_id)?.ok_or_else(|| Error::not_found("sprint", sprint_id))?;

    tx.execute(
        "UPDATE sprints SET status = ?1 WHERE sprint_id = ?2",
        params![status.as_str(), sprint.id],
    )
    .map_err(Error::from_sqlite)?;
    commit(tx)?;

    sprint.status = status;
    Ok(sprint)
}

// ---------------------------------------------------------------------------
// Sprint assignment
// ---------------------------------------------------------------------------

/// Assign the item to a sprint (or clear with `None`), logging the
/// `sprint` change entry the metrics engine reconstructs membership from.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] for unknown item/sprint and
/// [`Error::Validation`] for a sprint from another project.
pub fn assign_sprint(
    conn: &mut Connection,
    item_id: &str,
    sprint_id: Option<&str>,
    actor: &str,
) -> Result<WorkItem> {
    let now = Utc::now();
    let tx = immediate_tx(conn)?;

    let mut item =
        query::get_item(&tx, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;

    if let Some(sid) = sprint_id {
        let sprint =
            query::get_sprint(&tx, sid)?.ok_or_else(|| Error::not_found("sprint", sid))?;
        if sprint.project_id != item.project_id {
            return Err(Error::validation(format!(
                "sprint '{}' belongs to another project",
                sprint.key
            )));
        }
    }

    let old = item.sprint_id.clone();
    let new = sprint_id.map(str::to_string);
    if old == new {
        return Ok(item);
    }

    tx.execute(
        "UPDATE items SET sprint_id = ?1 WHERE item_id = ?2",
        params![new, item.id],
    )
    .map_err(Error::from_sqlite)?;
    query::append_change(
        &tx,
        &ChangeEntry::new(&item.id, fields::SPRINT, old, new.clone(), actor, now),
    )?;

    commit(tx)?;
    item.sprint_id = new;
    Ok(item)
}

// ---------------------------------------------------------------------------
// Field updates
// ---------------------------------------------------------------------------

/// Apply plain field updates, one change entry per touched field.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] for an unknown item and
/// [`Error::Validation`] for negative story points.
pub fn update_item(
    conn: &mut Connection,
    item_id: &str,
    update: &UpdateItem,
    actor: &str,
) -> Result<WorkItem> {
    validate_points(update.story_points)?;
    let now = Utc::now();
    let tx = immediate_tx(conn)?;

    let mut item =
        query::get_item(&tx, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;

    let mut entries: Vec<ChangeEntry> = Vec::new();
    let record = |field: &str, old: Option<String>, new: Option<String>| {
        ChangeEntry::new(&item.id, field, old, new, actor, now)
    };

    if let Some(title) = &update.title {
        if *title != item.title {
            entries.push(record(fields::TITLE, Some(item.title.clone()), Some(title.clone())));
            item.title = title.clone();
        }
    }
    if let Some(description) = &update.description {
        if Some(description.as_str()) != item.description.as_deref() {
            entries.push(record(
                fields::DESCRIPTION,
                item.description.clone(),
                Some(description.clone()),
            ));
            item.description = Some(description.clone());
        }
    }
    if let Some(priority) = update.priority {
        if priority != item.priority {
            entries.push(record(
                fields::PRIORITY,
                Some(item.priority.to_string()),
                Some(priority.to_string()),
            ));
            item.priority = priority;
        }
    }
    if let Some(points) = update.story_points {
        if Some(points) != item.story_points {
            entries.push(record(
                fields::STORY_POINTS,
                item.story_points.map(|p| p.to_string()),
                Some(points.to_string()),
            ));
            item.story_points = Some(points);
        }
    }
    if let Some(due) = update.due_date {
        if Some(due) != item.due_date {
            entries.push(record(
                fields::DUE_DATE,
                item.due_date.map(|d| d.to_rfc3339()),
                Some(due.to_rfc3339()),
            ));
            item.due_date = Some(due);
        }
    }
    if let Some(assignee) = &update.assignee {
        if Some(assignee.as_str()) != item.assignee.as_deref() {
            entries.push(record(
                fields::ASSIGNEE,
                item.assignee.clone(),
                Some(assignee.clone()),
            ));
            item.assignee = Some(assignee.clone());
        }
    }
    if let Some(labels) = &update.labels {
        if *labels != item.labels {
            entries.push(record(
                fields::LABELS,
                Some(item.labels.join(",")),
                Some(labels.join(",")),
            ));
            item.labels = labels.clone();
        }
    }

    if entries.is_empty() {
        return Ok(item);
    }

    let labels_json = serde_json::to_string(&item.labels)
        .map_err(|e| Error::validation(format!("labels are not serializable: {e}")))?;
    tx.execute(
        "UPDATE items SET title = ?1, description = ?2, priority = ?3, story_points = ?4, \
         due_at_us = ?5, assignee = ?6, labels_json = ?7 WHERE item_id = ?8",
        params![
            item.title,
            item.description,
            item.priority.to_string(),
            item.story_points,
            item.due_date.map(us_from_datetime),
            item.assignee,
            labels_json,
            item.id,
        ],
    )
    .map_err(Error::from_sqlite)?;

    for entry in &entries {
        query::append_change(&tx, entry)?;
    }

    commit(tx)?;
    Ok(item)
}

// ---------------------------------------------------------------------------
// Epic / parent structure
// ---------------------------------------------------------------------------

/// Point the item at an epic (or clear with `None`). The target must
/// resolve and must actually be of type epic.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] / [`Error::Validation`] per the
/// reference rules.
pub fn set_epic(
    conn: &mut Connection,
    item_id: &str,
    epic_ref: Option<&str>,
    actor: &str,
) -> Result<WorkItem> {
    let now = Utc::now();
    let tx = immediate_tx(conn)?;

    let mut item =
        query::get_item(&tx, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;

    let new_epic_id = match epic_ref {
        Some(reference) => Some(resolve_epic(&tx, &item.project_id, reference, item.item_type)?),
        None => None,
    };

    if new_epic_id.as_deref() == Some(item.id.as_str()) {
        return Err(Error::validation(
            "an item cannot be its own epic".to_string(),
        ));
    }

    let old = item.epic_id.clone();
    if old == new_epic_id {
        return Ok(item);
    }

    tx.execute(
        "UPDATE items SET epic_id = ?1 WHERE item_id = ?2",
        params![new_epic_id, item.id],
    )
    .map_err(Error::from_sqlite)?;
    query::append_change(
        &tx,
        &ChangeEntry::new(&item.id, fields::EPIC, old, new_epic_id.clone(), actor, now),
    )?;

    commit(tx)?;
    item.epic_id = new_epic_id;
    Ok(item)
}

/// Set the item's parent (or clear with `None`). The target must not be an
/// epic, and the resulting chain must stay acyclic and shallower than
/// [`MAX_PARENT_DEPTH`].
///
/// # Errors
///
/// Fails with [`Error::NotFound`] / [`Error::Validation`] per the
/// reference and cycle rules.
pub fn set_parent(
    conn: &mut Connection,
    item_id: &str,
    parent_ref: Option<&str>,
    actor: &str,
) -> Result<WorkItem> {
    let now = Utc::now();
    let tx = immediate_tx(conn)?;

    let mut item =
        query::get_item(&tx, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;

    let new_parent_id = match parent_ref {
        Some(reference) => {
            if item.item_type == ItemType::Epic {
                return Err(Error::validation(
                    "an epic cannot have a parent".to_string(),
                ));
            }
            let parent = query::resolve_item(&tx, &item.project_id, reference)?
                .ok_or_else(|| Error::not_found("parent", reference))?;
            if parent.item_type == ItemType::Epic {
                return Err(Error::validation(format!(
                    "parent '{}' is an epic; epics cannot be parents, use the epic link",
                    parent.key
                )));
            }
            if parent.id == item.id {
                return Err(Error::validation(
                    "an item cannot be its own parent".to_string(),
                ));
            }
            ensure_acyclic(&tx, &item, &parent)?;
            Some(parent.id)
        }
        None => None,
    };

    let old = item.parent_id.clone();
    if old == new_parent_id {
        return Ok(item);
    }

    tx.execute(
        "UPDATE items SET parent_id = ?1 WHERE item_id = ?2",
        params![new_parent_id, item.id],
    )
    .map_err(Error::from_sqlite)?;
    query::append_change(
        &tx,
        &ChangeEntry::new(
            &item.id,
            fields::PARENT,
            old,
            new_parent_id.clone(),
            actor,
            now,
        ),
    )?;

    commit(tx)?;
    item.parent_id = new_parent_id;
    Ok(item)
}

/// Walk the proposed parent's ancestor chain: reject when the chain loops
/// back to `item` or runs past the depth bound.
fn ensure_acyclic(tx: &Transaction<'_>, item: &WorkItem, parent: &WorkItem) -> Result<()> {
    let mut cursor = Some(parent.id.clone());
    let mut hops = 0usize;

    while let Some(ancestor_id) = cursor {
        if ancestor_id == item.id {
            return Err(Error::validation(format!(
                "setting parent '{}' would create a cycle",
                parent.key
            )));
        }
        hops += 1;
        if hops > MAX_PARENT_DEPTH {
            return Err(Error::validation(format!(
                "parent chain exceeds {MAX_PARENT_DEPTH} levels"
            )));
        }
        cursor = query::get_item(tx, &ancestor_id)?.and_then(|ancestor| ancestor.parent_id);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Symmetric links
// ---------------------------------------------------------------------------

/// Link two items. The edge lands on both endpoints in one transaction; a
/// link is never dangling on one side.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] / [`Error::Validation`] for bad
/// references, self-links, or an already-existing link.
pub fn add_link(conn: &mut Connection, item_id: &str, other_ref: &str, actor: &str) -> Result<()> {
    let now = Utc::now();
    let tx = immediate_tx(conn)?;

    let item =
        query::get_item(&tx, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;
    let other = query::resolve_item(&tx, &item.project_id, other_ref)?
        .ok_or_else(|| Error::not_found("item", other_ref))?;

    if item.id == other.id {
        return Err(Error::validation(
            "an item cannot be linked to itself".to_string(),
        ));
    }
    if item.linked_ids.contains(&other.id) {
        return Err(Error::validation(format!(
            "'{}' and '{}' are already linked",
            item.key, other.key
        )));
    }

    let created_us = us_from_datetime(now);
    for (a, b) in [(&item.id, &other.id), (&other.id, &item.id)] {
        tx.execute(
            "INSERT INTO item_links (item_id, linked_item_id, created_at_us) VALUES (?1, ?2, ?3)",
            params![a, b, created_us],
        )
        .map_err(Error::from_sqlite)?;
    }
    query::append_change(
        &tx,
        &ChangeEntry::new(&item.id, fields::LINK, None, Some(other.id.clone()), actor, now),
    )?;
    query::append_change(
        &tx,
        &ChangeEntry::new(&other.id, fields::LINK, None, Some(item.id.clone()), actor, now),
    )?;

    commit(tx)
}

/// Remove a link from both endpoints in one transaction.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] for bad references and
/// [`Error::Validation`] when the items are not linked.
pub fn remove_link(
    conn: &mut Connection,
    item_id: &str,
    other_ref: &str,
    actor: &str,
) -> Result<()> {
    let now = Utc::now();
    let tx = immediate_tx(conn)?;

    let item =
        query::get_item(&tx, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;
    let other = query::resolve_item(&tx, &item.project_id, other_ref)?
        .ok_or_else(|| Error::not_found("item", other_ref))?;

    let removed = tx
        .execute(
            "DELETE FROM item_links WHERE (item_id = ?1 AND linked_item_id = ?2) \
             OR (item_id = ?2 AND linked_item_id = ?1)",
            params![item.id, other.id],
        )
        .map_err(Error::from_sqlite)?;
    if removed == 0 {
        return Err(Error::validation(format!(
            "'{}' and '{}' are not linked",
            item.key, other.key
        )));
    }

    query::append_change(
        &tx,
        &ChangeEntry::new(&item.id, fields::UNLINK, Some(other.id.clone()), None, actor, now),
    )?;
    query::append_change(
        &tx,
        &ChangeEntry::new(&other.id, fields::UNLINK, Some(item.id.clone()), None, actor, now),
    )?;

    commit(tx)
}

// ---------------------------------------------------------------------------
// Soft delete
// ---------------------------------------------------------------------------

/// Soft-delete an item. Read paths exclude it from now on; its change log
/// stays intact and its key is never reissued.
///
/// # Errors
///
/// Fails with [`Error::NotFound`] for an unknown or already-deleted item.
pub fn delete_item(conn: &mut Connection, item_id: &str, actor: &str) -> Result<()> {
    let now = Utc::now();
    let tx = immediate_tx(conn)?;

    let item =
        query::get_item(&tx, item_id)?.ok_or_else(|| Error::not_found("item", item_id))?;

    tx.execute(
        "UPDATE items SET deleted_at_us = ?1 WHERE item_id = ?2",
        params![us_from_datetime(now), item.id],
    )
    .map_err(Error::from_sqlite)?;
    query::append_change(
        &tx,
        &ChangeEntry::new(&item.id, fields::DELETED, Some(item.key.clone()), None, actor, now),
    )?;

    commit(tx)?;
    tracing::info!(item = %item.key, "soft-deleted work item");
    Ok(())
}
