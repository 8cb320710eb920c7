//! Server database
//!
//! The server keeps the same `workspaces`, `notes` and `blocks` tables as a
//! client (without the sync bookkeeping columns) plus a disposable cache of
//! workspace hashes. Every row's `updated_at` is assigned here, never taken
//! from a client, and moves strictly forward on each write, so it doubles as
//! the row version for optimistic concurrency.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use arbor_core::hash::EMPTY_HASH;
use arbor_core::models::{self, ChangeAction, EntityKind};
use arbor_core::protocol::{
    BlockData, ChangeItem, ConflictReason, EntityData, NoteData, PushConflict, PushUpdate,
    WorkspaceData,
};
use arbor_core::storage::{load_tree, WorkspaceTree};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workspaces (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS notes (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    parent_id TEXT,
    title TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    is_favorite INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (parent_id IS NULL OR parent_id <> id),
    FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES notes(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS blocks (
    id TEXT PRIMARY KEY,
    note_id TEXT NOT NULL,
    type TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    metadata TEXT NOT NULL DEFAULT 'null',
    order_index INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE
);

-- Derived, safe to drop at any time
CREATE TABLE IF NOT EXISTS workspace_hashes (
    workspace_id TEXT PRIMARY KEY,
    hash TEXT NOT NULL,
    computed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workspaces_user ON workspaces(user_id);
CREATE INDEX IF NOT EXISTS idx_notes_workspace ON notes(workspace_id);
CREATE INDEX IF NOT EXISTS idx_notes_parent ON notes(parent_id);
CREATE INDEX IF NOT EXISTS idx_blocks_note ON blocks(note_id);
"#;

/// Result of one push item
#[derive(Debug)]
enum Outcome {
    Applied {
        updated_at: Option<i64>,
        /// Workspaces whose cached hash must be refreshed
        touched: Vec<Uuid>,
    },
    Rejected {
        reason: ConflictReason,
        message: String,
        server_updated_at: Option<i64>,
    },
}

impl Outcome {
    fn applied(updated_at: Option<i64>, touched: Vec<Uuid>) -> Self {
        Outcome::Applied { updated_at, touched }
    }

    fn rejected(reason: ConflictReason, message: impl Into<String>, current: Option<i64>) -> Self {
        Outcome::Rejected {
            reason,
            message: message.into(),
            server_updated_at: current,
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::rejected(ConflictReason::Invalid, message, None)
    }

    fn not_found(kind: EntityKind) -> Self {
        Self::rejected(ConflictReason::NotFound, format!("{} does not exist", kind), None)
    }

    fn stale(kind: EntityKind, current: i64) -> Self {
        Self::rejected(
            ConflictReason::Stale,
            format!("{} was changed by another client", kind),
            Some(current),
        )
    }
}

/// Per-item results of a push batch
#[derive(Debug, Default)]
pub struct BatchResult {
    pub updates: Vec<PushUpdate>,
    pub conflicts: Vec<PushConflict>,
}

/// Next version of a row: the write time, or one tick past the previous
/// version if the clock has not moved on
fn next_version(now: i64, previous: i64) -> i64 {
    now.max(previous + 1)
}

struct WorkspaceRow {
    user_id: String,
    updated_at: i64,
}

struct ChildRow {
    /// Workspace of a note, note of a block
    parent: Uuid,
    updated_at: i64,
}

fn parse_uuid(raw: String, idx: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn workspace_row(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<WorkspaceRow>> {
    conn.query_row(
        "SELECT user_id, updated_at FROM workspaces WHERE id = ?",
        [id.to_string()],
        |row| {
            Ok(WorkspaceRow {
                user_id: row.get(0)?,
                updated_at: row.get(1)?,
            })
        },
    )
    .optional()
}

fn note_row(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<ChildRow>> {
    conn.query_row(
        "SELECT workspace_id, updated_at FROM notes WHERE id = ?",
        [id.to_string()],
        |row| {
            Ok(ChildRow {
                parent: parse_uuid(row.get(0)?, 0)?,
                updated_at: row.get(1)?,
            })
        },
    )
    .optional()
}

fn block_row(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<ChildRow>> {
    conn.query_row(
        "SELECT note_id, updated_at FROM blocks WHERE id = ?",
        [id.to_string()],
        |row| {
            Ok(ChildRow {
                parent: parse_uuid(row.get(0)?, 0)?,
                updated_at: row.get(1)?,
            })
        },
    )
    .optional()
}

fn parent_of(conn: &Connection, note_id: Uuid) -> rusqlite::Result<Option<Uuid>> {
    let parent: Option<Option<String>> = conn
        .query_row(
            "SELECT parent_id FROM notes WHERE id = ?",
            [note_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    parent.flatten().map(|p| parse_uuid(p, 0)).transpose()
}

/// Whether the workspace exists and belongs to `user`
fn owns_workspace(conn: &Connection, user: &str, workspace_id: Uuid) -> rusqlite::Result<bool> {
    Ok(workspace_row(conn, workspace_id)?.is_some_and(|w| w.user_id == user))
}

/// Workspace of a note the user owns
fn owned_note_workspace(
    conn: &Connection,
    user: &str,
    note_id: Uuid,
) -> rusqlite::Result<Option<Uuid>> {
    match note_row(conn, note_id)? {
        Some(note) if owns_workspace(conn, user, note.parent)? => Ok(Some(note.parent)),
        _ => Ok(None),
    }
}

/// Check a note's parent: must exist in the same workspace and must not be
/// the note itself or one of its descendants
fn check_parent(
    conn: &Connection,
    note_id: Uuid,
    workspace_id: Uuid,
    parent_id: Option<Uuid>,
) -> rusqlite::Result<Option<Outcome>> {
    let Some(parent_id) = parent_id else {
        return Ok(None);
    };
    match note_row(conn, parent_id)? {
        None => return Ok(Some(Outcome::invalid(format!("parent note {} not found", parent_id)))),
        Some(parent) if parent.parent != workspace_id => {
            return Ok(Some(Outcome::invalid("parent note belongs to another workspace")))
        }
        Some(_) => {}
    }

    let mut current = Some(parent_id);
    let mut steps = 0usize;
    while let Some(id) = current {
        if id == note_id {
            return Ok(Some(Outcome::invalid("note would become its own ancestor")));
        }
        steps += 1;
        if steps > 100_000 {
            warn!("Parent chain of note {} does not terminate", note_id);
            return Ok(Some(Outcome::invalid("parent chain does not terminate")));
        }
        current = parent_of(conn, id)?;
    }
    Ok(None)
}

fn write_workspace(
    conn: &Connection,
    user: &str,
    item: &ChangeItem,
    data: &WorkspaceData,
    now: i64,
) -> rusqlite::Result<Outcome> {
    let id = item.entity_id;
    let existing = workspace_row(conn, id)?;

    if item.action == ChangeAction::Create {
        if let Some(row) = existing {
            return Ok(Outcome::rejected(
                ConflictReason::AlreadyExists,
                "workspace already exists",
                Some(row.updated_at),
            ));
        }
        let created_at = data.created_at.map_or(now, |t| t.timestamp_millis());
        conn.execute(
            "INSERT INTO workspaces (id, user_id, name, is_favorite, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![id.to_string(), user, data.name, data.is_favorite, created_at, now],
        )?;
        return Ok(Outcome::applied(Some(now), vec![id]));
    }

    let Some(row) = existing else {
        return Ok(Outcome::not_found(EntityKind::Workspace));
    };
    if row.user_id != user {
        return Ok(Outcome::invalid("workspace belongs to another user"));
    }
    let Some(baseline) = item.client_updated_at else {
        return Ok(Outcome::invalid("update without client_updated_at"));
    };

    let version = next_version(now, row.updated_at);
    let changed = conn.execute(
        "UPDATE workspaces SET name = ?2, is_favorite = ?3, updated_at = ?4
         WHERE id = ?1 AND updated_at = ?5",
        params![
            id.to_string(),
            data.name,
            data.is_favorite,
            version,
            baseline.timestamp_millis()
        ],
    )?;
    if changed == 0 {
        return Ok(Outcome::stale(EntityKind::Workspace, row.updated_at));
    }
    Ok(Outcome::applied(Some(version), vec![id]))
}

fn write_note(
    conn: &Connection,
    user: &str,
    item: &ChangeItem,
    data: &NoteData,
    now: i64,
) -> rusqlite::Result<Outcome> {
    let id = item.entity_id;
    if !owns_workspace(conn, user, data.workspace_id)? {
        return Ok(Outcome::invalid(format!(
            "workspace {} not found",
            data.workspace_id
        )));
    }
    let existing = note_row(conn, id)?;

    if item.action == ChangeAction::Create {
        if let Some(row) = existing {
            return Ok(Outcome::rejected(
                ConflictReason::AlreadyExists,
                "note already exists",
                Some(row.updated_at),
            ));
        }
        if let Some(rejected) = check_parent(conn, id, data.workspace_id, data.parent_id)? {
            return Ok(rejected);
        }
        let created_at = data.created_at.map_or(now, |t| t.timestamp_millis());
        conn.execute(
            "INSERT INTO notes
                (id, workspace_id, parent_id, title, content, is_favorite, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO NOTHING",
            params![
                id.to_string(),
                data.workspace_id.to_string(),
                data.parent_id.map(|p| p.to_string()),
                data.title,
                data.content,
                data.is_favorite,
                created_at,
                now
            ],
        )?;
        return Ok(Outcome::applied(Some(now), vec![data.workspace_id]));
    }

    let Some(row) = existing else {
        return Ok(Outcome::not_found(EntityKind::Note));
    };
    if row.parent != data.workspace_id {
        return Ok(Outcome::invalid("notes cannot move between workspaces"));
    }
    let Some(baseline) = item.client_updated_at else {
        return Ok(Outcome::invalid("update without client_updated_at"));
    };
    if let Some(rejected) = check_parent(conn, id, data.workspace_id, data.parent_id)? {
        return Ok(rejected);
    }

    let version = next_version(now, row.updated_at);
    let changed = conn.execute(
        "UPDATE notes SET parent_id = ?2, title = ?3, content = ?4, is_favorite = ?5, updated_at = ?6
         WHERE id = ?1 AND updated_at = ?7",
        params![
            id.to_string(),
            data.parent_id.map(|p| p.to_string()),
            data.title,
            data.content,
            data.is_favorite,
            version,
            baseline.timestamp_millis()
        ],
    )?;
    if changed == 0 {
        return Ok(Outcome::stale(EntityKind::Note, row.updated_at));
    }
    Ok(Outcome::applied(Some(version), vec![data.workspace_id]))
}

fn write_block(
    conn: &Connection,
    user: &str,
    item: &ChangeItem,
    data: &BlockData,
    now: i64,
) -> rusqlite::Result<Outcome> {
    let id = item.entity_id;
    let Some(workspace_id) = owned_note_workspace(conn, user, data.note_id)? else {
        return Ok(Outcome::invalid(format!("note {} not found", data.note_id)));
    };
    let existing = block_row(conn, id)?;
    let metadata = data.metadata.to_string();

    if item.action == ChangeAction::Create {
        if let Some(row) = existing {
            return Ok(Outcome::rejected(
                ConflictReason::AlreadyExists,
                "block already exists",
                Some(row.updated_at),
            ));
        }
        let created_at = data.created_at.map_or(now, |t| t.timestamp_millis());
        conn.execute(
            "INSERT INTO blocks
                (id, note_id, type, content, metadata, order_index, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO NOTHING",
            params![
                id.to_string(),
                data.note_id.to_string(),
                data.block_type,
                data.content,
                metadata,
                data.order_index,
                created_at,
                now
            ],
        )?;
        return Ok(Outcome::applied(Some(now), vec![workspace_id]));
    }

    let Some(row) = existing else {
        return Ok(Outcome::not_found(EntityKind::Block));
    };
    // The block may be moving away from a note of another workspace
    let Some(old_workspace) = owned_note_workspace(conn, user, row.parent)? else {
        return Ok(Outcome::invalid("block belongs to another user"));
    };
    let Some(baseline) = item.client_updated_at else {
        return Ok(Outcome::invalid("update without client_updated_at"));
    };

    let version = next_version(now, row.updated_at);
    let changed = conn.execute(
        "UPDATE blocks SET note_id = ?2, type = ?3, content = ?4, metadata = ?5,
             order_index = ?6, updated_at = ?7
         WHERE id = ?1 AND updated_at = ?8",
        params![
            id.to_string(),
            data.note_id.to_string(),
            data.block_type,
            data.content,
            metadata,
            data.order_index,
            version,
            baseline.timestamp_millis()
        ],
    )?;
    if changed == 0 {
        return Ok(Outcome::stale(EntityKind::Block, row.updated_at));
    }
    let mut touched = vec![workspace_id];
    if old_workspace != workspace_id {
        touched.push(old_workspace);
    }
    Ok(Outcome::applied(Some(version), touched))
}

/// Deletes are unconditional; deleting a row that is already gone succeeds
fn delete_entity(
    conn: &Connection,
    user: &str,
    kind: EntityKind,
    id: Uuid,
) -> rusqlite::Result<Outcome> {
    let workspace_id = match kind {
        EntityKind::Workspace => match workspace_row(conn, id)? {
            None => return Ok(Outcome::applied(None, Vec::new())),
            Some(row) if row.user_id != user => {
                return Ok(Outcome::invalid("workspace belongs to another user"))
            }
            Some(_) => id,
        },
        EntityKind::Note => match note_row(conn, id)? {
            None => return Ok(Outcome::applied(None, Vec::new())),
            Some(row) if !owns_workspace(conn, user, row.parent)? => {
                return Ok(Outcome::invalid("note belongs to another user"))
            }
            Some(row) => row.parent,
        },
        EntityKind::Block => match block_row(conn, id)? {
            None => return Ok(Outcome::applied(None, Vec::new())),
            Some(row) => match owned_note_workspace(conn, user, row.parent)? {
                Some(ws) => ws,
                None => return Ok(Outcome::invalid("block belongs to another user")),
            },
        },
    };

    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?", kind.table()),
        [id.to_string()],
    )?;
    Ok(Outcome::applied(None, vec![workspace_id]))
}

fn apply_change(
    conn: &Connection,
    user: &str,
    item: &ChangeItem,
    now: i64,
) -> rusqlite::Result<Outcome> {
    if item.action == ChangeAction::Delete {
        return delete_entity(conn, user, item.entity_type, item.entity_id);
    }

    let data = match EntityData::from_value(item.entity_type, item.data.clone()) {
        Ok(data) => data,
        Err(e) => {
            return Ok(Outcome::invalid(format!(
                "invalid {} payload: {}",
                item.entity_type, e
            )))
        }
    };
    match &data {
        EntityData::Workspace(d) => write_workspace(conn, user, item, d, now),
        EntityData::Note(d) => write_note(conn, user, item, d, now),
        EntityData::Block(d) => write_block(conn, user, item, d, now),
    }
}

/// Recompute a workspace hash and store it in the cache
fn refresh_hash_in(conn: &Connection, workspace_id: Uuid, now: i64) -> rusqlite::Result<String> {
    let tree = load_tree(conn, workspace_id, true)?;
    if tree.workspace.is_none() {
        conn.execute(
            "DELETE FROM workspace_hashes WHERE workspace_id = ?",
            [workspace_id.to_string()],
        )?;
        return Ok(EMPTY_HASH.to_string());
    }
    let hash = tree.hash();
    conn.execute(
        "INSERT INTO workspace_hashes (workspace_id, hash, computed_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(workspace_id) DO UPDATE SET hash = excluded.hash, computed_at = excluded.computed_at",
        params![workspace_id.to_string(), hash, now],
    )?;
    Ok(hash)
}

/// SQLite-backed server store
pub struct ServerDb {
    conn: Connection,
}

impl ServerDb {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Owner of a workspace, if it exists
    pub fn workspace_owner(&self, workspace_id: Uuid) -> rusqlite::Result<Option<String>> {
        Ok(workspace_row(&self.conn, workspace_id)?.map(|w| w.user_id))
    }

    pub fn owned_workspaces(&self, user: &str) -> rusqlite::Result<Vec<Uuid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM workspaces WHERE user_id = ? ORDER BY id")?;
        let ids = stmt
            .query_map([user], |row| parse_uuid(row.get(0)?, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Cached hash if it was computed within `ttl`.
    ///
    /// A missing or expired entry is recomputed for the next caller but
    /// reported as `None`, so status treats it as a mismatch.
    pub fn cached_hash(
        &self,
        workspace_id: Uuid,
        ttl: Duration,
    ) -> rusqlite::Result<Option<String>> {
        let now = models::now().timestamp_millis();
        let cached: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT hash, computed_at FROM workspace_hashes WHERE workspace_id = ?",
                [workspace_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match cached {
            Some((hash, computed_at)) if now - computed_at < ttl.as_millis() as i64 => Ok(Some(hash)),
            _ => {
                self.refresh_hash(workspace_id)?;
                Ok(None)
            }
        }
    }

    pub fn refresh_hash(&self, workspace_id: Uuid) -> rusqlite::Result<String> {
        refresh_hash_in(&self.conn, workspace_id, models::now().timestamp_millis())
    }

    pub fn load_workspace(
        &self,
        workspace_id: Uuid,
        include_blocks: bool,
    ) -> rusqlite::Result<WorkspaceTree> {
        load_tree(&self.conn, workspace_id, include_blocks)
    }

    /// Apply a push batch in one transaction.
    ///
    /// Items are applied in order; each yields an update or a conflict. A
    /// database failure other than a constraint violation aborts the whole
    /// batch.
    pub fn apply_batch(
        &mut self,
        user: &str,
        changes: &[ChangeItem],
        now: DateTime<Utc>,
    ) -> rusqlite::Result<BatchResult> {
        let now = now.timestamp_millis();
        let tx = self.conn.transaction()?;
        let mut result = BatchResult::default();
        let mut touched = BTreeSet::new();

        for item in changes {
            let outcome = match apply_change(&tx, user, item, now) {
                Ok(outcome) => outcome,
                Err(rusqlite::Error::SqliteFailure(e, message))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Outcome::invalid(message.unwrap_or_else(|| "constraint violation".to_string()))
                }
                Err(e) => return Err(e),
            };

            match outcome {
                Outcome::Applied {
                    updated_at,
                    touched: workspaces,
                } => {
                    debug!("Applied {} {} {}", item.action, item.entity_type, item.entity_id);
                    touched.extend(workspaces);
                    result.updates.push(PushUpdate {
                        entity_type: item.entity_type,
                        entity_id: item.entity_id,
                        action: item.action,
                        updated_at: updated_at.map(models::from_millis),
                    });
                }
                Outcome::Rejected {
                    reason,
                    message,
                    server_updated_at,
                } => {
                    debug!(
                        "Rejected {} {} {}: {} ({})",
                        item.action,
                        item.entity_type,
                        item.entity_id,
                        reason.as_str(),
                        message
                    );
                    result.conflicts.push(PushConflict {
                        entity_type: item.entity_type,
                        entity_id: item.entity_id,
                        action: item.action,
                        reason,
                        message,
                        server_updated_at: server_updated_at.map(models::from_millis),
                    });
                }
            }
        }

        for workspace_id in touched {
            refresh_hash_in(&tx, workspace_id, now)?;
        }
        tx.commit()?;
        Ok(result)
    }
}
