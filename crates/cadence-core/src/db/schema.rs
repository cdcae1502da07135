//! Canonical SQLite schema for the engine.
//!
//! The schema is normalized for queryability:
//! - `projects` owns the key prefix and the atomically incremented issue
//!   counter
//! - `items` keeps the latest aggregate fields for each work item
//! - `item_changes` is the append-only change log (never updated, never
//!   deleted)
//! - `item_links` models the symmetric link relation as one row per
//!   direction
//! - `sprints` and `reviews` are independent aggregates referenced by id;
//!   reviewer and checklist sub-records persist as JSON columns

/// Migration v1: core tables.
pub const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    project_id TEXT PRIMARY KEY,
    key_prefix TEXT NOT NULL UNIQUE CHECK (length(trim(key_prefix)) > 0),
    name TEXT NOT NULL,
    issue_counter INTEGER NOT NULL DEFAULT 0 CHECK (issue_counter >= 0)
);

CREATE TABLE IF NOT EXISTS sprints (
    sprint_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(project_id),
    key TEXT NOT NULL,
    name TEXT NOT NULL,
    start_at_us INTEGER NOT NULL,
    end_at_us INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('planned', 'active', 'completed')),
    CHECK (start_at_us <= end_at_us),
    UNIQUE (project_id, key)
);

CREATE TABLE IF NOT EXISTS items (
    item_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(project_id),
    key TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    item_type TEXT NOT NULL CHECK (item_type IN ('task', 'bug', 'story', 'epic', 'subtask')),
    status TEXT NOT NULL CHECK (status IN ('backlog', 'todo', 'in-progress', 'done')),
    priority TEXT NOT NULL DEFAULT 'medium' CHECK (priority IN ('low', 'medium', 'high', 'critical')),
    rank TEXT NOT NULL CHECK (length(rank) > 0),
    story_points REAL CHECK (story_points IS NULL OR story_points >= 0),
    sprint_id TEXT REFERENCES sprints(sprint_id),
    due_at_us INTEGER,
    parent_id TEXT REFERENCES items(item_id),
    epic_id TEXT REFERENCES items(item_id),
    assignee TEXT,
    labels_json TEXT NOT NULL DEFAULT '[]',
    resolution TEXT NOT NULL DEFAULT 'unresolved'
        CHECK (resolution IN ('unresolved', 'done', 'wont-fix', 'duplicate', 'incomplete')),
    resolution_at_us INTEGER,
    created_at_us INTEGER NOT NULL,
    deleted_at_us INTEGER,
    CHECK ((resolution = 'unresolved') = (resolution_at_us IS NULL))
);

CREATE TABLE IF NOT EXISTS item_changes (
    change_id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id TEXT NOT NULL REFERENCES items(item_id),
    field TEXT NOT NULL CHECK (length(trim(field)) > 0),
    old_value TEXT,
    new_value TEXT,
    actor TEXT NOT NULL,
    at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS item_links (
    item_id TEXT NOT NULL REFERENCES items(item_id),
    linked_item_id TEXT NOT NULL REFERENCES items(item_id),
    created_at_us INTEGER NOT NULL,
    PRIMARY KEY (item_id, linked_item_id),
    CHECK (item_id <> linked_item_id)
);

CREATE TABLE IF NOT EXISTS reviews (
    review_id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL REFERENCES items(item_id),
    requested_by TEXT NOT NULL,
    required_approvals INTEGER NOT NULL CHECK (required_approvals >= 1),
    reviewers_json TEXT NOT NULL,
    checklist_json TEXT NOT NULL,
    status TEXT NOT NULL
        CHECK (status IN ('pending', 'approved', 'changes-requested', 'cancelled', 'expired')),
    created_at_us INTEGER NOT NULL,
    deleted_at_us INTEGER
);
"#;

/// Migration v2: read-path indexes.
///
/// `idx_items_live_key` is partial over live rows: a soft-deleted item
/// releases its key from the uniqueness constraint, but keys are still
/// never reused because the issue counter is monotonic.
pub const MIGRATION_V2_SQL: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_items_live_key
    ON items(project_id, key) WHERE deleted_at_us IS NULL;

CREATE INDEX IF NOT EXISTS idx_items_column_rank
    ON items(project_id, status, rank) WHERE deleted_at_us IS NULL;

CREATE INDEX IF NOT EXISTS idx_items_sprint
    ON items(sprint_id) WHERE deleted_at_us IS NULL;

CREATE INDEX IF NOT EXISTS idx_changes_item_field_at
    ON item_changes(item_id, field, at_us);

CREATE INDEX IF NOT EXISTS idx_changes_sprint_value
    ON item_changes(new_value) WHERE field = 'sprint';

CREATE INDEX IF NOT EXISTS idx_reviews_item_status
    ON reviews(item_id, status) WHERE deleted_at_us IS NULL;

CREATE INDEX IF NOT EXISTS idx_sprints_project_start
    ON sprints(project_id, start_at_us);
";

/// Index names the migration tests assert on.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_items_live_key",
    "idx_items_column_rank",
    "idx_items_sprint",
    "idx_changes_item_field_at",
    "idx_changes_sprint_value",
    "idx_reviews_item_status",
    "idx_sprints_project_start",
];
