//! Local store
//!
//! The `Store` owns the device's SQLite database and is the only writer of
//! workspace, note and block rows. It enforces the tree invariants and the
//! outbox rule:
//!
//! - every local mutation appends a change-log entry in the same transaction
//! - remote rows arriving through a pull are written with `sync_status =
//!   synced` and no change-log entry
//! - a note can never become its own ancestor
//! - a note's blocks are renumbered `0..n` after every insert, move or delete
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = Store::open(&config)?;
//!
//! let ws = Workspace::new(config.owner_id(), "Personal");
//! store.create_workspace(&ws)?;
//!
//! let note = Note::new(ws.id, None, "Ideas");
//! store.create_note(&note)?;
//! store.add_block(note.id, "text", "first thought", None)?;
//! ```

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::changelog::{ChangeLog, ChangeLogCounts};
use crate::config::Config;
use crate::models::{self, Block, ChangeAction, ChangeLogEntry, EntityKind, Note, Workspace};
use crate::storage::rows::{
    self, BLOCK_COLUMNS, BLOCK_WIDTH, NOTE_COLUMNS, NOTE_WIDTH, WORKSPACE_COLUMNS, WORKSPACE_WIDTH,
};
use crate::storage::{init_schema, needs_init, StorageError, StorageResult, WorkspaceTree};
use crate::sync::merge::{self, MergeStats};

/// A row waiting for the user to pick a side
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRow {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    /// Name, title or content preview
    pub label: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Row and change log totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub workspaces: i64,
    pub notes: i64,
    pub blocks: i64,
    pub conflicts: i64,
    pub pending_changes: i64,
    pub failed_changes: i64,
}

/// Local SQLite store with change tracking
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open the store in the configured data directory
    pub fn open(config: &Config) -> StorageResult<Self> {
        if !config.data_dir.exists() {
            std::fs::create_dir_all(&config.data_dir)
                .map_err(|e| StorageError::from_io(e, config.data_dir.clone()))?;
        }
        Self::open_path(&config.database_path())
    }

    /// Open (or create) a store at a specific path
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self { conn, path })
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read access to the change log
    pub fn change_log(&self) -> ChangeLog<'_> {
        ChangeLog::new(&self.conn)
    }

    // ==================== Workspace Operations ====================

    /// Insert a new workspace and log its creation
    pub fn create_workspace(&mut self, ws: &Workspace) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO workspaces (id, user_id, name, is_favorite, created_at, updated_at, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
            params![
                ws.id.to_string(),
                ws.user_id,
                ws.name,
                ws.is_favorite,
                ws.created_at.timestamp_millis(),
                ws.updated_at.timestamp_millis(),
            ],
        )?;
        log_current(&tx, EntityKind::Workspace, ws.id, ChangeAction::Create)?;
        tx.commit()?;
        debug!("Created workspace {}", ws.id);
        Ok(())
    }

    /// Save name and favorite flag of an existing workspace
    pub fn update_workspace(&mut self, ws: &Workspace) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE workspaces SET name = ?2, is_favorite = ?3, updated_at = ?4, sync_status = 'pending'
             WHERE id = ?1",
            params![
                ws.id.to_string(),
                ws.name,
                ws.is_favorite,
                models::now().timestamp_millis(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::not_found(EntityKind::Workspace, ws.id));
        }
        log_current(&tx, EntityKind::Workspace, ws.id, ChangeAction::Update)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a workspace with everything in it.
    ///
    /// Each note and block removed by the cascade gets its own delete entry.
    pub fn delete_workspace(&mut self, id: Uuid) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let tree = local_tree(&tx, id)?;
        if tree.workspace.is_none() {
            return Err(StorageError::not_found(EntityKind::Workspace, id));
        }
        for block in &tree.blocks {
            log_delete(&tx, EntityKind::Block, block.id)?;
        }
        for note in &tree.notes {
            log_delete(&tx, EntityKind::Note, note.id)?;
        }
        log_delete(&tx, EntityKind::Workspace, id)?;
        tx.execute("DELETE FROM workspaces WHERE id = ?", [id.to_string()])?;
        tx.commit()?;
        debug!(
            "Deleted workspace {} ({} notes, {} blocks)",
            id,
            tree.notes.len(),
            tree.blocks.len()
        );
        Ok(())
    }

    pub fn get_workspace(&self, id: Uuid) -> StorageResult<Option<Workspace>> {
        get_workspace_in(&self.conn, id)
    }

    /// All workspaces, by name
    pub fn list_workspaces(&self) -> StorageResult<Vec<Workspace>> {
        query_all(
            &self.conn,
            &format!(
                "SELECT {}, sync_status FROM workspaces ORDER BY name COLLATE NOCASE, id",
                WORKSPACE_COLUMNS
            ),
            [],
            local_workspace,
        )
    }

    // ==================== Note Operations ====================

    /// Insert a new note and log its creation
    pub fn create_note(&mut self, note: &Note) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        if get_workspace_in(&tx, note.workspace_id)?.is_none() {
            return Err(StorageError::not_found(EntityKind::Workspace, note.workspace_id));
        }
        if let Some(parent_id) = note.parent_id {
            check_parent(&tx, note.workspace_id, parent_id)?;
        }
        tx.execute(
            "INSERT INTO notes (id, workspace_id, parent_id, title, content, is_favorite,
                                created_at, updated_at, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending')",
            params![
                note.id.to_string(),
                note.workspace_id.to_string(),
                note.parent_id.map(|p| p.to_string()),
                note.title,
                note.content,
                note.is_favorite,
                note.created_at.timestamp_millis(),
                note.updated_at.timestamp_millis(),
            ],
        )?;
        log_current(&tx, EntityKind::Note, note.id, ChangeAction::Create)?;
        tx.commit()?;
        Ok(())
    }

    /// Save title, content and favorite flag of an existing note.
    ///
    /// The parent is left alone; use [`Store::move_note`] to re-parent.
    pub fn update_note(&mut self, note: &Note) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE notes SET title = ?2, content = ?3, is_favorite = ?4, updated_at = ?5,
                              sync_status = 'pending'
             WHERE id = ?1",
            params![
                note.id.to_string(),
                note.title,
                note.content,
                note.is_favorite,
                models::now().timestamp_millis(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::not_found(EntityKind::Note, note.id));
        }
        log_current(&tx, EntityKind::Note, note.id, ChangeAction::Update)?;
        tx.commit()?;
        Ok(())
    }

    /// Re-parent a note within its workspace (`None` makes it a root)
    pub fn move_note(&mut self, id: Uuid, parent_id: Option<Uuid>) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let note =
            get_note_in(&tx, id)?.ok_or_else(|| StorageError::not_found(EntityKind::Note, id))?;

        if let Some(parent_id) = parent_id {
            check_parent(&tx, note.workspace_id, parent_id)?;
            if is_ancestor_or_self(&tx, id, parent_id)? {
                return Err(StorageError::CycleDetected {
                    note_id: id,
                    parent_id,
                });
            }
        }

        tx.execute(
            "UPDATE notes SET parent_id = ?2, updated_at = ?3, sync_status = 'pending' WHERE id = ?1",
            params![
                id.to_string(),
                parent_id.map(|p| p.to_string()),
                models::now().timestamp_millis(),
            ],
        )?;
        log_current(&tx, EntityKind::Note, id, ChangeAction::Update)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a note with its sub-notes and blocks
    pub fn delete_note(&mut self, id: Uuid) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        if get_note_in(&tx, id)?.is_none() {
            return Err(StorageError::not_found(EntityKind::Note, id));
        }

        let subtree = subtree_ids(&tx, id)?;
        for note_id in &subtree {
            for block in blocks_of(&tx, *note_id)? {
                log_delete(&tx, EntityKind::Block, block.id)?;
            }
        }
        // Deepest first
        for note_id in subtree.iter().rev() {
            log_delete(&tx, EntityKind::Note, *note_id)?;
        }
        tx.execute("DELETE FROM notes WHERE id = ?", [id.to_string()])?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_note(&self, id: Uuid) -> StorageResult<Option<Note>> {
        get_note_in(&self.conn, id)
    }

    /// All notes of a workspace, oldest first
    pub fn list_notes(&self, workspace_id: Uuid) -> StorageResult<Vec<Note>> {
        query_all(
            &self.conn,
            &format!(
                "SELECT {}, sync_status FROM notes WHERE workspace_id = ? ORDER BY created_at, id",
                NOTE_COLUMNS
            ),
            [workspace_id.to_string()],
            local_note,
        )
    }

    // ==================== Block Operations ====================

    /// Insert a block at `position` (default: end) and shift the rest down
    pub fn add_block(
        &mut self,
        note_id: Uuid,
        block_type: &str,
        content: &str,
        position: Option<i64>,
    ) -> StorageResult<Block> {
        let tx = self.conn.transaction()?;
        if get_note_in(&tx, note_id)?.is_none() {
            return Err(StorageError::not_found(EntityKind::Note, note_id));
        }

        let siblings = blocks_of(&tx, note_id)?;
        let len = siblings.len();
        let position = position.unwrap_or(len as i64);
        if position < 0 || position > len as i64 {
            return Err(StorageError::InvalidPosition { position, len });
        }

        let block = Block::new(note_id, block_type, content, position);
        tx.execute(
            &format!(
                "INSERT INTO blocks ({}, sync_status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending')",
                BLOCK_COLUMNS
            ),
            params![
                block.id.to_string(),
                note_id.to_string(),
                block.block_type,
                block.content,
                serde_json::to_string(&block.metadata)?,
                block.order_index,
                block.created_at.timestamp_millis(),
                block.updated_at.timestamp_millis(),
            ],
        )?;
        log_current(&tx, EntityKind::Block, block.id, ChangeAction::Create)?;

        let mut order: Vec<(Uuid, i64)> = siblings.iter().map(|b| (b.id, b.order_index)).collect();
        order.insert(position as usize, (block.id, block.order_index));
        renumber(&tx, &order)?;

        tx.commit()?;
        Ok(block)
    }

    /// Save type, content and metadata of an existing block
    pub fn update_block(&mut self, block: &Block) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE blocks SET type = ?2, content = ?3, metadata = ?4, updated_at = ?5,
                               sync_status = 'pending'
             WHERE id = ?1",
            params![
                block.id.to_string(),
                block.block_type,
                block.content,
                serde_json::to_string(&block.metadata)?,
                models::now().timestamp_millis(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::not_found(EntityKind::Block, block.id));
        }
        log_current(&tx, EntityKind::Block, block.id, ChangeAction::Update)?;
        tx.commit()?;
        Ok(())
    }

    /// Move a block to `position` among its siblings
    pub fn move_block(&mut self, id: Uuid, position: i64) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let block =
            get_block_in(&tx, id)?.ok_or_else(|| StorageError::not_found(EntityKind::Block, id))?;

        let mut order: Vec<(Uuid, i64)> = blocks_of(&tx, block.note_id)?
            .iter()
            .map(|b| (b.id, b.order_index))
            .collect();
        let len = order.len();
        if position < 0 || position >= len as i64 {
            return Err(StorageError::InvalidPosition { position, len });
        }

        let from = order.iter().position(|(bid, _)| *bid == id).unwrap_or(0);
        let moved = order.remove(from);
        order.insert(position as usize, moved);
        renumber(&tx, &order)?;

        tx.commit()?;
        Ok(())
    }

    /// Delete a block and close the gap it leaves
    pub fn delete_block(&mut self, id: Uuid) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let block =
            get_block_in(&tx, id)?.ok_or_else(|| StorageError::not_found(EntityKind::Block, id))?;

        log_delete(&tx, EntityKind::Block, id)?;
        tx.execute("DELETE FROM blocks WHERE id = ?", [id.to_string()])?;

        let order: Vec<(Uuid, i64)> = blocks_of(&tx, block.note_id)?
            .iter()
            .map(|b| (b.id, b.order_index))
            .collect();
        renumber(&tx, &order)?;

        tx.commit()?;
        Ok(())
    }

    pub fn get_block(&self, id: Uuid) -> StorageResult<Option<Block>> {
        get_block_in(&self.conn, id)
    }

    /// Blocks of a note in display order
    pub fn list_blocks(&self, note_id: Uuid) -> StorageResult<Vec<Block>> {
        blocks_of(&self.conn, note_id)
    }

    // ==================== Sync Support ====================

    /// Hash of a workspace's current local content ([`crate::hash::EMPTY_HASH`] if absent)
    pub fn compute_workspace_hash(&self, workspace_id: Uuid) -> StorageResult<String> {
        Ok(rows::load_tree(&self.conn, workspace_id, true)?.hash())
    }

    /// Hash of every local workspace
    pub fn workspace_hashes(&self) -> StorageResult<BTreeMap<Uuid, String>> {
        let ids: Vec<Uuid> = query_all(
            &self.conn,
            "SELECT id FROM workspaces",
            [],
            |row| rows::uuid_at(row, 0),
        )?;
        let mut hashes = BTreeMap::new();
        for id in ids {
            hashes.insert(id, self.compute_workspace_hash(id)?);
        }
        Ok(hashes)
    }

    /// Local rows of one workspace including their sync status
    pub fn workspace_tree(&self, workspace_id: Uuid) -> StorageResult<WorkspaceTree> {
        local_tree(&self.conn, workspace_id)
    }

    /// Pending change-log entries, oldest first
    pub fn list_pending(&self) -> StorageResult<Vec<ChangeLogEntry>> {
        self.change_log().list_pending()
    }

    /// Last server-confirmed `updated_at` of a row (`None` if never synced or absent)
    pub fn base_updated_at(
        &self,
        kind: EntityKind,
        id: Uuid,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let base: Option<Option<i64>> = self
            .conn
            .query_row(
                &format!("SELECT base_updated_at FROM {} WHERE id = ?", kind.table()),
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(base.flatten().map(models::from_millis))
    }

    /// Record that the server accepted a row at `server_timestamp`.
    ///
    /// The row adopts the timestamp as its baseline. It only returns to
    /// `synced` (and takes the server's `updated_at`) when no newer local
    /// edit is still waiting in the change log.
    pub fn mark_synced(
        &mut self,
        kind: EntityKind,
        id: Uuid,
        server_timestamp: DateTime<Utc>,
    ) -> StorageResult<()> {
        mark_synced_in(&self.conn, kind, id, server_timestamp)
    }

    /// Settle change-log entries the server accepted (or that never needed
    /// sending) and update the row.
    pub fn confirm_push(
        &mut self,
        entry_ids: &[i64],
        kind: EntityKind,
        id: Uuid,
        server_timestamp: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let log = ChangeLog::new(&tx);
        for entry in entry_ids {
            log.mark_success(*entry)?;
        }
        if let Some(ts) = server_timestamp {
            mark_synced_in(&tx, kind, id, ts)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Settle change-log entries the server refused and flag the row.
    ///
    /// The row keeps its local data. When the server reports its current
    /// version that becomes the baseline, so keeping the local copy later is
    /// a plain update; otherwise (`invalid`, `not_found`) the last confirmed
    /// baseline stays.
    pub fn reject_push(
        &mut self,
        entry_ids: &[i64],
        kind: EntityKind,
        id: Uuid,
        message: &str,
        server_timestamp: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let log = ChangeLog::new(&tx);
        for entry in entry_ids {
            log.mark_error(*entry, message)?;
        }
        tx.execute(
            &format!(
                "UPDATE {} SET base_updated_at = COALESCE(?2, base_updated_at) WHERE id = ?1",
                kind.table()
            ),
            params![id.to_string(), server_timestamp.map(|t| t.timestamp_millis())],
        )?;
        if !log.has_pending(id)? {
            tx.execute(
                &format!(
                    "UPDATE {} SET sync_status = 'conflict' WHERE id = ?1",
                    kind.table()
                ),
                [id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Merge a server snapshot of one workspace into the local rows.
    ///
    /// Runs in one transaction and writes no change-log entries.
    pub fn apply_pull(
        &mut self,
        workspace_id: Uuid,
        remote: &WorkspaceTree,
        include_blocks: bool,
    ) -> StorageResult<MergeStats> {
        let tx = self.conn.transaction()?;
        let local = local_tree(&tx, workspace_id)?;
        let pending = ChangeLog::new(&tx).pending_entity_ids()?;
        let plan = merge::plan_merge(&local, remote, &pending, include_blocks);
        if plan.is_empty() {
            debug!("Pull of workspace {} changes nothing locally", workspace_id);
            return Ok(plan.stats);
        }

        if plan.delete_workspace {
            tx.execute("DELETE FROM workspaces WHERE id = ?", [workspace_id.to_string()])?;
        }
        if let Some(ws) = &plan.workspace {
            upsert_remote_workspace(&tx, ws)?;
        }
        for note in &plan.notes {
            upsert_remote_note(&tx, note)?;
        }
        for block in &plan.blocks {
            upsert_remote_block(&tx, block)?;
        }
        for id in &plan.delete_blocks {
            tx.execute("DELETE FROM blocks WHERE id = ?", [id.to_string()])?;
        }
        for id in &plan.delete_notes {
            tx.execute("DELETE FROM notes WHERE id = ?", [id.to_string()])?;
        }

        tx.commit()?;
        Ok(plan.stats)
    }

    // ==================== Conflicts ====================

    /// Every row in `conflict` state
    pub fn list_conflicts(&self) -> StorageResult<Vec<ConflictRow>> {
        query_all(
            &self.conn,
            "SELECT 'workspace', id, name, updated_at FROM workspaces WHERE sync_status = 'conflict'
             UNION ALL
             SELECT 'note', id, title, updated_at FROM notes WHERE sync_status = 'conflict'
             UNION ALL
             SELECT 'block', id, substr(content, 1, 60), updated_at FROM blocks WHERE sync_status = 'conflict'
             ORDER BY 4",
            [],
            |row| {
                let kind: String = row.get(0)?;
                Ok(ConflictRow {
                    entity_type: kind.parse::<EntityKind>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    entity_id: rows::uuid_at(row, 1)?,
                    label: row.get(2)?,
                    updated_at: models::from_millis(row.get(3)?),
                })
            },
        )
    }

    /// Keep the local copy: log it again so the next push overwrites the server.
    ///
    /// Logged as a create when the server has never confirmed the row.
    pub fn resolve_keep_local(&mut self, kind: EntityKind, id: Uuid) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let base: Option<Option<i64>> = tx
            .query_row(
                &format!("SELECT base_updated_at FROM {} WHERE id = ?", kind.table()),
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(base) = base else {
            return Err(StorageError::not_found(kind, id));
        };

        tx.execute(
            &format!(
                "UPDATE {} SET sync_status = 'pending', updated_at = ?2 WHERE id = ?1",
                kind.table()
            ),
            params![id.to_string(), models::now().timestamp_millis()],
        )?;
        let action = if base.is_some() {
            ChangeAction::Update
        } else {
            ChangeAction::Create
        };
        log_current(&tx, kind, id, action)?;
        tx.commit()?;
        Ok(())
    }

    /// Keep the server copy: the next pull overwrites (or removes) the row.
    ///
    /// Refused while newer local edits of the row are still pending.
    pub fn resolve_keep_remote(&mut self, kind: EntityKind, id: Uuid) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        if ChangeLog::new(&tx).has_pending(id)? {
            return Err(StorageError::PendingChanges { kind, id });
        }
        // Epoch timestamp: any server copy is newer
        let changed = tx.execute(
            &format!(
                "UPDATE {} SET sync_status = 'synced', updated_at = 0 WHERE id = ?1",
                kind.table()
            ),
            [id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::not_found(kind, id));
        }
        tx.commit()?;
        Ok(())
    }

    // ==================== Diagnostics ====================

    pub fn stats(&self) -> StorageResult<StoreStats> {
        let count = |sql: &str| -> StorageResult<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        let ChangeLogCounts { pending, error, .. } = self.change_log().counts()?;
        Ok(StoreStats {
            workspaces: count("SELECT COUNT(*) FROM workspaces")?,
            notes: count("SELECT COUNT(*) FROM notes")?,
            blocks: count("SELECT COUNT(*) FROM blocks")?,
            conflicts: count(
                "SELECT (SELECT COUNT(*) FROM workspaces WHERE sync_status = 'conflict')
                      + (SELECT COUNT(*) FROM notes WHERE sync_status = 'conflict')
                      + (SELECT COUNT(*) FROM blocks WHERE sync_status = 'conflict')",
            )?,
            pending_changes: pending,
            failed_changes: error,
        })
    }
}

// ==================== Row helpers ====================

fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, f: F) -> StorageResult<Vec<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, f)?
        .collect::<rusqlite::Result<Vec<T>>>()?;
    Ok(rows)
}

fn local_workspace(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    let mut ws = rows::workspace_from_row(row)?;
    ws.sync_status = rows::status_at(row, WORKSPACE_WIDTH)?;
    Ok(ws)
}

fn local_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    let mut note = rows::note_from_row(row)?;
    note.sync_status = rows::status_at(row, NOTE_WIDTH)?;
    Ok(note)
}

fn local_block(row: &Row<'_>) -> rusqlite::Result<Block> {
    let mut block = rows::block_from_row(row)?;
    block.sync_status = rows::status_at(row, BLOCK_WIDTH)?;
    Ok(block)
}

fn get_workspace_in(conn: &Connection, id: Uuid) -> StorageResult<Option<Workspace>> {
    Ok(conn
        .query_row(
            &format!("SELECT {}, sync_status FROM workspaces WHERE id = ?", WORKSPACE_COLUMNS),
            [id.to_string()],
            local_workspace,
        )
        .optional()?)
}

fn get_note_in(conn: &Connection, id: Uuid) -> StorageResult<Option<Note>> {
    Ok(conn
        .query_row(
            &format!("SELECT {}, sync_status FROM notes WHERE id = ?", NOTE_COLUMNS),
            [id.to_string()],
            local_note,
        )
        .optional()?)
}

fn get_block_in(conn: &Connection, id: Uuid) -> StorageResult<Option<Block>> {
    Ok(conn
        .query_row(
            &format!("SELECT {}, sync_status FROM blocks WHERE id = ?", BLOCK_COLUMNS),
            [id.to_string()],
            local_block,
        )
        .optional()?)
}

fn blocks_of(conn: &Connection, note_id: Uuid) -> StorageResult<Vec<Block>> {
    query_all(
        conn,
        &format!(
            "SELECT {}, sync_status FROM blocks WHERE note_id = ? ORDER BY order_index, id",
            BLOCK_COLUMNS
        ),
        [note_id.to_string()],
        local_block,
    )
}

fn local_tree(conn: &Connection, workspace_id: Uuid) -> StorageResult<WorkspaceTree> {
    let id = workspace_id.to_string();
    let workspace = get_workspace_in(conn, workspace_id)?;
    let notes = query_all(
        conn,
        &format!(
            "SELECT {}, sync_status FROM notes WHERE workspace_id = ? ORDER BY created_at, id",
            NOTE_COLUMNS
        ),
        [&id],
        local_note,
    )?;
    let blocks = query_all(
        conn,
        &format!(
            "SELECT {}, sync_status FROM blocks
             WHERE note_id IN (SELECT id FROM notes WHERE workspace_id = ?)
             ORDER BY note_id, order_index, id",
            BLOCK_COLUMNS
        ),
        [&id],
        local_block,
    )?;
    Ok(WorkspaceTree {
        workspace,
        notes,
        blocks,
    })
}

/// Parent must exist and live in the same workspace
fn check_parent(conn: &Connection, workspace_id: Uuid, parent_id: Uuid) -> StorageResult<()> {
    let parent = get_note_in(conn, parent_id)?
        .ok_or_else(|| StorageError::not_found(EntityKind::Note, parent_id))?;
    if parent.workspace_id != workspace_id {
        return Err(StorageError::ParentOutsideWorkspace {
            parent_id,
            workspace_id,
        });
    }
    Ok(())
}

/// Is `note_id` equal to `candidate` or one of its ancestors?
fn is_ancestor_or_self(conn: &Connection, note_id: Uuid, candidate: Uuid) -> StorageResult<bool> {
    let mut seen = HashSet::new();
    let mut current = Some(candidate);
    while let Some(id) = current {
        if id == note_id {
            return Ok(true);
        }
        if !seen.insert(id) {
            // Existing cycle in stored data; refuse to build on it
            return Ok(true);
        }
        current = conn
            .query_row(
                "SELECT parent_id FROM notes WHERE id = ?",
                [id.to_string()],
                |row| rows::opt_uuid_at(row, 0),
            )
            .optional()?
            .flatten();
    }
    Ok(false)
}

/// A note and all its descendants, breadth first
fn subtree_ids(conn: &Connection, root: Uuid) -> StorageResult<Vec<Uuid>> {
    let mut stmt = conn.prepare("SELECT id FROM notes WHERE parent_id = ?")?;
    let mut ordered = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        ordered.push(id);
        let children = stmt
            .query_map([id.to_string()], |row| rows::uuid_at(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        queue.extend(children);
    }
    Ok(ordered)
}

/// Give blocks the indexes `0..n` in the given order, logging every block
/// whose index changes
fn renumber(conn: &Connection, order: &[(Uuid, i64)]) -> StorageResult<()> {
    let now = models::now().timestamp_millis();
    for (index, (id, current)) in order.iter().enumerate() {
        let index = index as i64;
        if *current == index {
            continue;
        }
        conn.execute(
            "UPDATE blocks SET order_index = ?2, updated_at = ?3, sync_status = 'pending' WHERE id = ?1",
            params![id.to_string(), index, now],
        )?;
        log_current(conn, EntityKind::Block, *id, ChangeAction::Update)?;
    }
    Ok(())
}

/// Append a change-log entry carrying the row as it is now stored
fn log_current(
    conn: &Connection,
    kind: EntityKind,
    id: Uuid,
    action: ChangeAction,
) -> StorageResult<i64> {
    let missing = || StorageError::not_found(kind, id);
    let payload = match kind {
        EntityKind::Workspace => {
            serde_json::to_string(&get_workspace_in(conn, id)?.ok_or_else(missing)?)?
        }
        EntityKind::Note => serde_json::to_string(&get_note_in(conn, id)?.ok_or_else(missing)?)?,
        EntityKind::Block => serde_json::to_string(&get_block_in(conn, id)?.ok_or_else(missing)?)?,
    };
    ChangeLog::new(conn).append(kind, id, action, &payload)
}

fn log_delete(conn: &Connection, kind: EntityKind, id: Uuid) -> StorageResult<i64> {
    ChangeLog::new(conn).append(kind, id, ChangeAction::Delete, "null")
}

fn mark_synced_in(
    conn: &Connection,
    kind: EntityKind,
    id: Uuid,
    server_timestamp: DateTime<Utc>,
) -> StorageResult<()> {
    let ts = server_timestamp.timestamp_millis();
    conn.execute(
        &format!("UPDATE {} SET base_updated_at = ?2 WHERE id = ?1", kind.table()),
        params![id.to_string(), ts],
    )?;
    if !ChangeLog::new(conn).has_pending(id)? {
        conn.execute(
            &format!(
                "UPDATE {} SET updated_at = ?2, sync_status = 'synced' WHERE id = ?1",
                kind.table()
            ),
            params![id.to_string(), ts],
        )?;
    }
    Ok(())
}

fn upsert_remote_workspace(conn: &Connection, ws: &Workspace) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO workspaces (id, user_id, name, is_favorite, created_at, updated_at,
                                 base_updated_at, sync_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 'synced')
         ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            name = excluded.name,
            is_favorite = excluded.is_favorite,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            base_updated_at = excluded.base_updated_at,
            sync_status = 'synced'",
        params![
            ws.id.to_string(),
            ws.user_id,
            ws.name,
            ws.is_favorite,
            ws.created_at.timestamp_millis(),
            ws.updated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn upsert_remote_note(conn: &Connection, note: &Note) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO notes (id, workspace_id, parent_id, title, content, is_favorite,
                            created_at, updated_at, base_updated_at, sync_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 'synced')
         ON CONFLICT(id) DO UPDATE SET
            workspace_id = excluded.workspace_id,
            parent_id = excluded.parent_id,
            title = excluded.title,
            content = excluded.content,
            is_favorite = excluded.is_favorite,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            base_updated_at = excluded.base_updated_at,
            sync_status = 'synced'",
        params![
            note.id.to_string(),
            note.workspace_id.to_string(),
            note.parent_id.map(|p| p.to_string()),
            note.title,
            note.content,
            note.is_favorite,
            note.created_at.timestamp_millis(),
            note.updated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn upsert_remote_block(conn: &Connection, block: &Block) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO blocks (id, note_id, type, content, metadata, order_index,
                             created_at, updated_at, base_updated_at, sync_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 'synced')
         ON CONFLICT(id) DO UPDATE SET
            note_id = excluded.note_id,
            type = excluded.type,
            content = excluded.content,
            metadata = excluded.metadata,
            order_index = excluded.order_index,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            base_updated_at = excluded.base_updated_at,
            sync_status = 'synced'",
        params![
            block.id.to_string(),
            block.note_id.to_string(),
            block.block_type,
            block.content,
            serde_json::to_string(&block.metadata)?,
            block.order_index,
            block.created_at.timestamp_millis(),
            block.updated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeStatus, SyncStatus};
    use chrono::Duration;
    use tempfile::TempDir;

    fn store_with_workspace() -> (Store, Workspace) {
        let mut store = Store::open_in_memory().unwrap();
        let ws = Workspace::new("alice", "Personal");
        store.create_workspace(&ws).unwrap();
        (store, ws)
    }

    fn pending_actions(store: &Store, id: Uuid) -> Vec<ChangeAction> {
        store
            .list_pending()
            .unwrap()
            .into_iter()
            .filter(|e| e.entity_id == id)
            .map(|e| e.action)
            .collect()
    }

    /// Pretend the server confirmed everything currently pending
    fn settle_all(store: &mut Store) {
        for entry in store.list_pending().unwrap() {
            let ts = models::now();
            store
                .confirm_push(&[entry.id], entry.entity_type, entry.entity_id, Some(ts))
                .unwrap();
        }
    }

    #[test]
    fn test_open_creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().join("data"),
            ..Config::default()
        };
        let store = Store::open(&config).unwrap();
        assert!(config.database_path().exists());
        assert_eq!(store.path(), Some(config.database_path().as_path()));
    }

    #[test]
    fn test_mutation_and_log_entry_are_atomic() {
        let (mut store, ws) = store_with_workspace();
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, ws.id);
        assert_eq!(pending[0].action, ChangeAction::Create);

        let snapshot: Workspace = serde_json::from_str(&pending[0].payload).unwrap();
        assert_eq!(snapshot.name, "Personal");

        // A failing insert leaves no entry behind
        let orphan = Note::new(Uuid::new_v4(), None, "Orphan");
        assert!(matches!(
            store.create_note(&orphan),
            Err(StorageError::NotFound { kind: EntityKind::Workspace, .. })
        ));
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn test_workspace_crud() {
        let (mut store, mut ws) = store_with_workspace();
        ws.set_name("Work");
        ws.set_favorite(true);
        store.update_workspace(&ws).unwrap();

        let loaded = store.get_workspace(ws.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Work");
        assert!(loaded.is_favorite);
        assert_eq!(loaded.sync_status, SyncStatus::Pending);
        assert_eq!(
            pending_actions(&store, ws.id),
            vec![ChangeAction::Create, ChangeAction::Update]
        );

        store.delete_workspace(ws.id).unwrap();
        assert!(store.get_workspace(ws.id).unwrap().is_none());
        assert!(store.list_workspaces().unwrap().is_empty());
    }

    #[test]
    fn test_delete_workspace_logs_every_row() {
        let (mut store, ws) = store_with_workspace();
        let note = Note::new(ws.id, None, "A");
        store.create_note(&note).unwrap();
        let block = store.add_block(note.id, "text", "x", None).unwrap();

        store.delete_workspace(ws.id).unwrap();

        assert!(pending_actions(&store, note.id).contains(&ChangeAction::Delete));
        assert!(pending_actions(&store, block.id).contains(&ChangeAction::Delete));
        assert!(store.get_block(block.id).unwrap().is_none());
    }

    #[test]
    fn test_note_parent_must_share_workspace() {
        let (mut store, ws) = store_with_workspace();
        let other = Workspace::new("alice", "Other");
        store.create_workspace(&other).unwrap();
        let foreign = Note::new(other.id, None, "Foreign");
        store.create_note(&foreign).unwrap();

        let note = Note::new(ws.id, Some(foreign.id), "Child");
        assert!(matches!(
            store.create_note(&note),
            Err(StorageError::ParentOutsideWorkspace { .. })
        ));
    }

    #[test]
    fn test_move_note_rejects_cycles() {
        let (mut store, ws) = store_with_workspace();
        let a = Note::new(ws.id, None, "A");
        let b = Note::new(ws.id, Some(a.id), "B");
        let c = Note::new(ws.id, Some(b.id), "C");
        for note in [&a, &b, &c] {
            store.create_note(note).unwrap();
        }

        assert!(matches!(
            store.move_note(a.id, Some(c.id)),
            Err(StorageError::CycleDetected { .. })
        ));
        assert!(matches!(
            store.move_note(a.id, Some(a.id)),
            Err(StorageError::CycleDetected { .. })
        ));

        store.move_note(c.id, None).unwrap();
        assert!(store.get_note(c.id).unwrap().unwrap().parent_id.is_none());
        store.move_note(a.id, Some(c.id)).unwrap();
        assert_eq!(store.get_note(a.id).unwrap().unwrap().parent_id, Some(c.id));
    }

    #[test]
    fn test_delete_note_cascades_and_logs() {
        let (mut store, ws) = store_with_workspace();
        let parent = Note::new(ws.id, None, "Parent");
        let child = Note::new(ws.id, Some(parent.id), "Child");
        store.create_note(&parent).unwrap();
        store.create_note(&child).unwrap();
        let block = store.add_block(child.id, "text", "inside", None).unwrap();

        store.delete_note(parent.id).unwrap();

        assert!(store.get_note(child.id).unwrap().is_none());
        assert!(store.get_block(block.id).unwrap().is_none());
        assert_eq!(pending_actions(&store, child.id).last(), Some(&ChangeAction::Delete));
        assert_eq!(pending_actions(&store, block.id).last(), Some(&ChangeAction::Delete));
    }

    #[test]
    fn test_blocks_stay_contiguous() {
        let (mut store, ws) = store_with_workspace();
        let note = Note::new(ws.id, None, "Doc");
        store.create_note(&note).unwrap();

        let first = store.add_block(note.id, "text", "one", None).unwrap();
        let third = store.add_block(note.id, "text", "three", None).unwrap();
        let second = store.add_block(note.id, "text", "two", Some(1)).unwrap();

        let order = |store: &Store| -> Vec<(Uuid, i64)> {
            store
                .list_blocks(note.id)
                .unwrap()
                .iter()
                .map(|b| (b.id, b.order_index))
                .collect()
        };
        assert_eq!(order(&store), vec![(first.id, 0), (second.id, 1), (third.id, 2)]);

        store.move_block(third.id, 0).unwrap();
        assert_eq!(order(&store), vec![(third.id, 0), (first.id, 1), (second.id, 2)]);

        store.delete_block(first.id).unwrap();
        assert_eq!(order(&store), vec![(third.id, 0), (second.id, 1)]);

        assert!(matches!(
            store.add_block(note.id, "text", "far", Some(5)),
            Err(StorageError::InvalidPosition { position: 5, len: 2 })
        ));
        assert!(matches!(
            store.move_block(second.id, 2),
            Err(StorageError::InvalidPosition { .. })
        ));
    }

    #[test]
    fn test_renumbered_siblings_are_logged() {
        let (mut store, ws) = store_with_workspace();
        let note = Note::new(ws.id, None, "Doc");
        store.create_note(&note).unwrap();
        let a = store.add_block(note.id, "text", "a", None).unwrap();
        let b = store.add_block(note.id, "text", "b", None).unwrap();
        settle_all(&mut store);

        store.add_block(note.id, "heading", "top", Some(0)).unwrap();

        assert_eq!(pending_actions(&store, a.id), vec![ChangeAction::Update]);
        assert_eq!(pending_actions(&store, b.id), vec![ChangeAction::Update]);
        let entry = store
            .list_pending()
            .unwrap()
            .into_iter()
            .find(|e| e.entity_id == b.id)
            .unwrap();
        let snapshot: Block = serde_json::from_str(&entry.payload).unwrap();
        assert_eq!(snapshot.order_index, 2);
    }

    #[test]
    fn test_mark_synced_respects_newer_edits() {
        let (mut store, ws) = store_with_workspace();
        let entry = store.list_pending().unwrap().remove(0);

        // Edit lands while the create is in flight
        let mut edited = ws.clone();
        edited.set_name("Renamed");
        store.update_workspace(&edited).unwrap();

        let server_ts = models::now() + Duration::seconds(1);
        store
            .confirm_push(&[entry.id], EntityKind::Workspace, ws.id, Some(server_ts))
            .unwrap();

        let row = store.get_workspace(ws.id).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Pending);
        assert_eq!(row.name, "Renamed");
        assert_eq!(
            store.base_updated_at(EntityKind::Workspace, ws.id).unwrap(),
            Some(server_ts)
        );
        assert_eq!(
            store.change_log().get(entry.id).unwrap().unwrap().status,
            ChangeStatus::Success
        );
    }

    #[test]
    fn test_mark_synced_adopts_server_timestamp() {
        let (mut store, ws) = store_with_workspace();
        let entry = store.list_pending().unwrap().remove(0);
        let server_ts = models::now() + Duration::seconds(3);
        store
            .confirm_push(&[entry.id], EntityKind::Workspace, ws.id, Some(server_ts))
            .unwrap();

        let row = store.get_workspace(ws.id).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(row.updated_at, server_ts);

        let later = server_ts + Duration::seconds(1);
        store.mark_synced(EntityKind::Workspace, ws.id, later).unwrap();
        assert_eq!(store.get_workspace(ws.id).unwrap().unwrap().updated_at, later);
    }

    #[test]
    fn test_reject_push_flags_conflict() {
        let (mut store, ws) = store_with_workspace();
        settle_all(&mut store);
        let mut edited = ws.clone();
        edited.set_name("Mine");
        store.update_workspace(&edited).unwrap();
        let entry = store.list_pending().unwrap().remove(0);

        let server_ts = models::now() + Duration::seconds(10);
        store
            .reject_push(&[entry.id], EntityKind::Workspace, ws.id, "stale", Some(server_ts))
            .unwrap();

        let row = store.get_workspace(ws.id).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Conflict);
        assert_eq!(row.name, "Mine");
        assert_eq!(
            store.base_updated_at(EntityKind::Workspace, ws.id).unwrap(),
            Some(server_ts)
        );

        let conflicts = store.list_conflicts().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].label, "Mine");
        assert_eq!(store.stats().unwrap().conflicts, 1);
        assert_eq!(store.stats().unwrap().failed_changes, 1);
    }

    #[test]
    fn test_resolve_keep_local_relogs_update() {
        let (mut store, ws) = store_with_workspace();
        settle_all(&mut store);
        let entry_id = {
            store.update_workspace(&ws).unwrap();
            store.list_pending().unwrap()[0].id
        };
        store
            .reject_push(&[entry_id], EntityKind::Workspace, ws.id, "stale", Some(models::now()))
            .unwrap();

        store.resolve_keep_local(EntityKind::Workspace, ws.id).unwrap();

        assert_eq!(pending_actions(&store, ws.id), vec![ChangeAction::Update]);
        let row = store.get_workspace(ws.id).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Pending);
        assert!(store.list_conflicts().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_keep_local_recreates_unknown_row() {
        let (mut store, ws) = store_with_workspace();
        let entry = store.list_pending().unwrap().remove(0);
        store
            .reject_push(&[entry.id], EntityKind::Workspace, ws.id, "invalid", None)
            .unwrap();

        store.resolve_keep_local(EntityKind::Workspace, ws.id).unwrap();
        assert_eq!(pending_actions(&store, ws.id), vec![ChangeAction::Create]);
    }

    #[test]
    fn test_resolve_keep_remote() {
        let (mut store, ws) = store_with_workspace();
        let entry = store.list_pending().unwrap().remove(0);
        store
            .reject_push(&[entry.id], EntityKind::Workspace, ws.id, "stale", Some(models::now()))
            .unwrap();

        store.resolve_keep_remote(EntityKind::Workspace, ws.id).unwrap();

        let row = store.get_workspace(ws.id).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(row.updated_at.timestamp_millis(), 0);
        assert!(store.list_pending().unwrap().is_empty());

        // Not allowed while an edit is waiting
        store.update_workspace(&ws).unwrap();
        assert!(matches!(
            store.resolve_keep_remote(EntityKind::Workspace, ws.id),
            Err(StorageError::PendingChanges { .. })
        ));
    }

    #[test]
    fn test_apply_pull_matches_remote_hash() {
        let remote_ws = {
            let mut ws = Workspace::new("alice", "Shared");
            ws.sync_status = SyncStatus::Synced;
            ws
        };
        let root = Note::new(remote_ws.id, None, "Root");
        let child = Note::new(remote_ws.id, Some(root.id), "Child");
        let block = Block::new(child.id, "text", "hello", 0);
        let remote = WorkspaceTree {
            workspace: Some(remote_ws.clone()),
            notes: vec![child.clone(), root.clone()],
            blocks: vec![block.clone()],
        };

        let mut store = Store::open_in_memory().unwrap();
        let stats = store.apply_pull(remote_ws.id, &remote, true).unwrap();
        assert_eq!(stats.inserted, 4);

        assert_eq!(store.compute_workspace_hash(remote_ws.id).unwrap(), remote.hash());
        assert!(store.list_pending().unwrap().is_empty());
        let note = store.get_note(child.id).unwrap().unwrap();
        assert_eq!(note.sync_status, SyncStatus::Synced);
        assert_eq!(
            store.base_updated_at(EntityKind::Note, child.id).unwrap(),
            Some(child.updated_at)
        );

        // Pulling again is a no-op
        let again = store.apply_pull(remote_ws.id, &remote, true).unwrap();
        assert_eq!(again.total_applied(), 0);
        assert_eq!(store.compute_workspace_hash(remote_ws.id).unwrap(), remote.hash());
        assert_eq!(store.get_note(child.id).unwrap().unwrap().sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_apply_pull_keeps_pending_edit() {
        let (mut store, ws) = store_with_workspace();
        let note = Note::new(ws.id, None, "Local");
        store.create_note(&note).unwrap();
        settle_all(&mut store);

        let mut edited = store.get_note(note.id).unwrap().unwrap();
        edited.set_content("unsynced words");
        store.update_note(&edited).unwrap();

        let mut remote = store.workspace_tree(ws.id).unwrap();
        remote.notes[0].content = "server words".into();
        remote.notes[0].updated_at += Duration::seconds(30);
        store.apply_pull(ws.id, &remote, true).unwrap();

        let row = store.get_note(note.id).unwrap().unwrap();
        assert_eq!(row.content, "unsynced words");
        assert_eq!(row.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_apply_pull_remote_delete() {
        let (mut store, ws) = store_with_workspace();
        let note = Note::new(ws.id, None, "Gone soon");
        store.create_note(&note).unwrap();
        settle_all(&mut store);

        let mut remote = store.workspace_tree(ws.id).unwrap();
        remote.notes.clear();
        let stats = store.apply_pull(ws.id, &remote, true).unwrap();

        assert_eq!(stats.deleted, 1);
        assert!(store.get_note(note.id).unwrap().is_none());
        assert!(store.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_workspace_hashes_cover_every_workspace() {
        let (mut store, ws) = store_with_workspace();
        let other = Workspace::new("alice", "Second");
        store.create_workspace(&other).unwrap();

        let hashes = store.workspace_hashes().unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[&ws.id], store.compute_workspace_hash(ws.id).unwrap());
        assert_ne!(hashes[&ws.id], hashes[&other.id]);
    }
}
