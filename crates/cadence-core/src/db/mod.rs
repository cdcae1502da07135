//! SQLite store utilities.
//!
//! Runtime defaults are intentionally conservative:
//! - `journal_mode = WAL` to allow concurrent readers while a writer runs
//! - `busy_timeout = 5s` to reduce transient lock failures under contention
//! - `foreign_keys = ON` to protect relational integrity
//!
//! Every mutating engine operation runs inside a `BEGIN IMMEDIATE`
//! transaction on top of these defaults; see [`crate::lifecycle`].

pub mod migrations;
pub mod query;
pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

use crate::error::{Error, Result};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the store, apply runtime pragmas, and migrate the
/// schema to the latest version.
///
/// # Errors
///
/// Returns [`Error::Storage`] if opening/configuring/migrating fails.
pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            Error::Validation(format!(
                "cannot create store directory {}: {error}",
                parent.display()
            ))
        })?;
    }

    let mut conn = Connection::open(path)?;
    configure_connection(&conn)?;
    migrations::migrate(&mut conn)?;

    Ok(conn)
}

/// Open a fresh in-memory store with the full schema applied. Intended
/// for tests and ephemeral tooling.
///
/// # Errors
///
/// Returns [`Error::Storage`] if configuration or migration fails.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrate(&mut conn)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Convert a stored microsecond timestamp back to a `DateTime`.
pub(crate) fn datetime_from_us(column: usize, us: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, us))
}

/// Convert a `DateTime` to the stored microsecond representation.
pub(crate) fn us_from_datetime(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, open_in_memory, open_store};
    use crate::db::migrations;
    use tempfile::TempDir;

    fn temp_db_path() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("cadence.sqlite3");
        (dir, path)
    }

    #[test]
    fn open_store_sets_wal_busy_timeout_and_fk() {
        let (_dir, path) = temp_db_path();
        let conn = open_store(&path).expect("open store");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(u128::from(busy_timeout_ms), DEFAULT_BUSY_TIMEOUT.as_millis());

        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("query foreign_keys");
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn open_store_runs_migrations() {
        let (_dir, path) = temp_db_path();
        let conn = open_store(&path).expect("open store");

        let version = migrations::current_schema_version(&conn).expect("schema version query");
        assert_eq!(version, migrations::LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn in_memory_store_is_migrated() {
        let conn = open_in_memory().expect("open in-memory store");
        let version = migrations::current_schema_version(&conn).expect("schema version query");
        assert_eq!(version, migrations::LATEST_SCHEMA_VERSION);
    }
}
