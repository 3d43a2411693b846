// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded custody database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `schedules`: schedule_id → serialized StoredSchedule
//! - `schedule_names`: `len:owner|name` → schedule_id (per-owner name uniqueness)
//! - `sessions`: session_id → serialized StoredSession
//! - `owner_sessions`: `len:owner|session_id` → session_id
//! - `key_records`: owner_user_id → serialized StoredKeyRecord
//! - `audit_events`: `timestamp|event_id` → serialized AuditEvent
//!
//! Every multi-row change runs inside one write transaction, so readers never
//! observe a half-applied claim or error record.

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableDatabase, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const SCHEDULES: TableDefinition<&str, &[u8]> = TableDefinition::new("schedules");

/// Index: `len:owner|name` → schedule_id.
pub(crate) const SCHEDULE_NAMES: TableDefinition<&str, &str> =
    TableDefinition::new("schedule_names");

pub(crate) const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Index: `len:owner|session_id` → session_id, for per-owner range scans.
pub(crate) const OWNER_SESSIONS: TableDefinition<&str, &str> =
    TableDefinition::new("owner_sessions");

pub(crate) const KEY_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("key_records");

/// Audit log keyed by RFC 3339 timestamp so a date prefix selects one day.
pub(crate) const AUDIT_EVENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("audit_events");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("blocking task failed: {0}")]
    Blocking(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Run `work` on tokio's blocking pool.
///
/// redb commits fsync and PBKDF2 burns CPU; neither may run on a runtime
/// worker. A panicked or cancelled task surfaces as [`DbError::Blocking`].
pub async fn run_blocking<T, E, F>(work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<DbError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| E::from(DbError::Blocking(e.to_string())))?
}

// =============================================================================
// Key Helpers
// =============================================================================

/// Owner prefix for index keys: `len:owner|`.
///
/// The byte length makes the prefix unambiguous when the owner id itself
/// contains `|` (e.g. `auth0|abc`).
fn owner_prefix(owner: &str) -> String {
    format!("{}:{owner}|", owner.len())
}

/// Composite key for owner-scoped index tables.
pub(crate) fn owner_key(owner: &str, suffix: &str) -> String {
    format!("{}{suffix}", owner_prefix(owner))
}

/// Half-open range covering every key of exactly this owner.
///
/// `}` is the byte after `|`, so the upper bound sorts past any suffix.
pub(crate) fn owner_range(owner: &str) -> (String, String) {
    (owner_prefix(owner), format!("{}:{owner}}}", owner.len()))
}

/// Decode a stored JSON value.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

// =============================================================================
// CustodyDatabase
// =============================================================================

/// Embedded ACID store for schedules, sessions, key records and audit events.
pub struct CustodyDatabase {
    db: Database,
}

impl CustodyDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SCHEDULES)?;
            let _ = write_txn.open_table(SCHEDULE_NAMES)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(OWNER_SESSIONS)?;
            let _ = write_txn.open_table(KEY_RECORDS)?;
            let _ = write_txn.open_table(AUDIT_EVENTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub(crate) fn begin_read(&self) -> DbResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    pub(crate) fn begin_write(&self) -> DbResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    /// Cheap readiness probe: opens a read transaction on the schedule table.
    pub fn health_check(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(SCHEDULES)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_db() -> (CustodyDatabase, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = CustodyDatabase::open(&dir.path().join("custody.redb")).unwrap();
        (db, dir)
    }

    #[test]
    fn open_creates_tables_and_passes_health_check() {
        let (db, _dir) = temp_db();
        db.health_check().unwrap();

        let read_txn = db.begin_read().unwrap();
        assert!(read_txn.open_table(SESSIONS).is_ok());
        assert!(read_txn.open_table(AUDIT_EVENTS).is_ok());
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("custody.redb");
        {
            let db = CustodyDatabase::open(&path).unwrap();
            let write_txn = db.begin_write().unwrap();
            {
                let mut table = write_txn.open_table(KEY_RECORDS).unwrap();
                table.insert("owner-1", b"{}".as_slice()).unwrap();
            }
            write_txn.commit().unwrap();
        }

        let db = CustodyDatabase::open(&path).unwrap();
        let read_txn = db.begin_read().unwrap();
        let table = read_txn.open_table(KEY_RECORDS).unwrap();
        assert!(table.get("owner-1").unwrap().is_some());
    }

    #[test]
    fn owner_range_excludes_other_owners() {
        let (db, _dir) = temp_db();
        let write_txn = db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(OWNER_SESSIONS).unwrap();
            table.insert(owner_key("alice", "s1").as_str(), "s1").unwrap();
            table.insert(owner_key("alice", "s2").as_str(), "s2").unwrap();
            table.insert(owner_key("alice2", "s3").as_str(), "s3").unwrap();
            table.insert(owner_key("alicf", "s4").as_str(), "s4").unwrap();
        }
        write_txn.commit().unwrap();

        let (start, end) = owner_range("alice");
        let read_txn = db.begin_read().unwrap();
        let table = read_txn.open_table(OWNER_SESSIONS).unwrap();
        let ids: Vec<String> = table
            .range(start.as_str()..end.as_str())
            .unwrap()
            .map(|entry| entry.unwrap().1.value().to_string())
            .collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[test]
    fn owner_keys_stay_distinct_with_separator_in_owner() {
        assert_ne!(owner_key("a", "b|c"), owner_key("a|b", "c"));

        let (db, _dir) = temp_db();
        let write_txn = db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(OWNER_SESSIONS).unwrap();
            table.insert(owner_key("user_1", "s1").as_str(), "s1").unwrap();
            table.insert(owner_key("user_1|x", "s2").as_str(), "s2").unwrap();
            table.insert(owner_key("user_1}", "s3").as_str(), "s3").unwrap();
        }
        write_txn.commit().unwrap();

        let read_txn = db.begin_read().unwrap();
        let table = read_txn.open_table(OWNER_SESSIONS).unwrap();
        let scan = |owner: &str| -> Vec<String> {
            let (start, end) = owner_range(owner);
            table
                .range(start.as_str()..end.as_str())
                .unwrap()
                .map(|entry| entry.unwrap().1.value().to_string())
                .collect()
        };
        assert_eq!(scan("user_1"), vec!["s1"]);
        assert_eq!(scan("user_1|x"), vec!["s2"]);
    }

    #[tokio::test]
    async fn run_blocking_returns_result_and_reports_panics() {
        let value: DbResult<u32> = run_blocking(|| Ok(7)).await;
        assert_eq!(value.unwrap(), 7);

        let failed: DbResult<u32> = run_blocking(|| -> DbResult<u32> { panic!("worker died") }).await;
        assert!(matches!(failed, Err(DbError::Blocking(_))));
    }
}
