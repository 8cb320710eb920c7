//! Change log (outbox) of local mutations
//!
//! Every local create/update/delete appends one entry in the same SQLite
//! transaction as the row write. Entries move `pending → success` or
//! `pending → error` exactly once and are never deleted, so the table doubles
//! as an audit trail. Sync always reads pending entries oldest first.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;
use uuid::Uuid;

use crate::models::{self, ChangeAction, ChangeLogEntry, ChangeStatus, EntityKind};
use crate::storage::{StorageError, StorageResult};

const ENTRY_COLUMNS: &str =
    "id, entity_type, entity_id, action, status, payload, created_at, synced_at, error";

/// Entry totals by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeLogCounts {
    pub pending: i64,
    pub success: i64,
    pub error: i64,
}

/// Change log bound to a connection or an open transaction
pub struct ChangeLog<'c> {
    conn: &'c Connection,
}

impl<'c> ChangeLog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Append a pending entry and return its id
    pub fn append(
        &self,
        entity_type: EntityKind,
        entity_id: Uuid,
        action: ChangeAction,
        payload: &str,
    ) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO change_log (entity_type, entity_id, action, status, payload, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
            params![
                entity_type.as_str(),
                entity_id.to_string(),
                action.as_str(),
                payload,
                models::now().timestamp_millis(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All pending entries, oldest first.
    ///
    /// Rows that cannot be decoded are logged, moved to `error`, and left
    /// out of the result.
    pub fn list_pending(&self) -> StorageResult<Vec<ChangeLogEntry>> {
        let sql = format!(
            "SELECT {} FROM change_log WHERE status = 'pending' ORDER BY created_at, id",
            ENTRY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], RawEntry::from_row)?;

        let mut entries = Vec::new();
        let mut corrupt = Vec::new();
        for raw in rows {
            let raw = raw?;
            match raw.decode() {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Skipping corrupt change log entry {}: {}", raw.id, e);
                    corrupt.push((raw.id, e.to_string()));
                }
            }
        }
        drop(stmt);

        for (id, message) in corrupt {
            self.mark_error(id, &message)?;
        }

        Ok(entries)
    }

    /// Most recent entries of any status, newest first
    pub fn list_recent(&self, limit: usize) -> StorageResult<Vec<ChangeLogEntry>> {
        let sql = format!(
            "SELECT {} FROM change_log ORDER BY created_at DESC, id DESC LIMIT ?",
            ENTRY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], RawEntry::from_row)?;

        let mut entries = Vec::new();
        for raw in rows {
            let raw = raw?;
            if let Ok(entry) = raw.decode() {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Get a single entry
    pub fn get(&self, id: i64) -> StorageResult<Option<ChangeLogEntry>> {
        let sql = format!("SELECT {} FROM change_log WHERE id = ?", ENTRY_COLUMNS);
        let raw = self
            .conn
            .query_row(&sql, [id], RawEntry::from_row)
            .optional()?;
        raw.map(|r| r.decode()).transpose()
    }

    /// Transition a pending entry to `success`. Returns false if it was not pending.
    pub fn mark_success(&self, id: i64) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE change_log SET status = 'success', synced_at = ?2, error = NULL
             WHERE id = ?1 AND status = 'pending'",
            params![id, models::now().timestamp_millis()],
        )?;
        Ok(changed == 1)
    }

    /// Transition a pending entry to `error`. Returns false if it was not pending.
    pub fn mark_error(&self, id: i64, message: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE change_log SET status = 'error', synced_at = ?2, error = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![id, models::now().timestamp_millis(), message],
        )?;
        Ok(changed == 1)
    }

    /// Whether any pending entry exists for this entity
    pub fn has_pending(&self, entity_id: Uuid) -> StorageResult<bool> {
        let exists = self
            .conn
            .prepare("SELECT 1 FROM change_log WHERE entity_id = ? AND status = 'pending' LIMIT 1")?
            .exists([entity_id.to_string()])?;
        Ok(exists)
    }

    /// Ids of every entity with at least one pending entry
    pub fn pending_entity_ids(&self) -> StorageResult<HashSet<Uuid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT entity_id FROM change_log WHERE status = 'pending'")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();
        Ok(ids)
    }

    /// Entry totals by status
    pub fn counts(&self) -> StorageResult<ChangeLogCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM change_log GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = ChangeLogCounts::default();
        for row in rows {
            let (status, n) = row?;
            match status.parse::<ChangeStatus>() {
                Ok(ChangeStatus::Pending) => counts.pending = n,
                Ok(ChangeStatus::Success) => counts.success = n,
                Ok(ChangeStatus::Error) => counts.error = n,
                Err(_) => {}
            }
        }
        Ok(counts)
    }
}

/// Undecoded change log row
struct RawEntry {
    id: i64,
    entity_type: String,
    entity_id: String,
    action: String,
    status: String,
    payload: String,
    created_at: i64,
    synced_at: Option<i64>,
    error: Option<String>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            action: row.get(3)?,
            status: row.get(4)?,
            payload: row.get(5)?,
            created_at: row.get(6)?,
            synced_at: row.get(7)?,
            error: row.get(8)?,
        })
    }

    fn decode(&self) -> StorageResult<ChangeLogEntry> {
        let corrupt = |details: String| StorageError::Corrupt {
            what: "change log entry",
            details,
        };
        Ok(ChangeLogEntry {
            id: self.id,
            entity_type: self.entity_type.parse().map_err(|e| corrupt(format!("{}", e)))?,
            entity_id: Uuid::parse_str(&self.entity_id).map_err(|e| corrupt(e.to_string()))?,
            action: self.action.parse().map_err(|e| corrupt(format!("{}", e)))?,
            status: self.status.parse().map_err(|e| corrupt(format!("{}", e)))?,
            payload: self.payload.clone(),
            created_at: models::from_millis(self.created_at),
            synced_at: self.synced_at.map(models::from_millis),
            error: self.error.clone(),
        })
    }
}
