//! Row mapping shared by the local store and the sync gateway
//!
//! Both sides keep `workspaces`, `notes` and `blocks` tables whose leading
//! columns are identical, so the same SELECT lists and decoders serve both.
//! The local store appends `sync_status` after these columns.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::models::{self, Block, Note, SyncStatus, Workspace};

pub const WORKSPACE_COLUMNS: &str = "id, user_id, name, is_favorite, created_at, updated_at";
pub const NOTE_COLUMNS: &str =
    "id, workspace_id, parent_id, title, content, is_favorite, created_at, updated_at";
pub const BLOCK_COLUMNS: &str =
    "id, note_id, type, content, metadata, order_index, created_at, updated_at";

/// Number of leading columns in each list, where `sync_status` would follow
pub const WORKSPACE_WIDTH: usize = 6;
pub const NOTE_WIDTH: usize = 8;
pub const BLOCK_WIDTH: usize = 8;

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<SyncStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: uuid_at(row, 0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        is_favorite: row.get(3)?,
        created_at: models::from_millis(row.get(4)?),
        updated_at: models::from_millis(row.get(5)?),
        sync_status: SyncStatus::Synced,
    })
}

pub fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        parent_id: opt_uuid_at(row, 2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        is_favorite: row.get(5)?,
        created_at: models::from_millis(row.get(6)?),
        updated_at: models::from_millis(row.get(7)?),
        sync_status: SyncStatus::Synced,
    })
}

pub fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    let metadata: String = row.get(4)?;
    Ok(Block {
        id: uuid_at(row, 0)?,
        note_id: uuid_at(row, 1)?,
        block_type: row.get(2)?,
        content: row.get(3)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| conversion_error(4, e))?,
        order_index: row.get(5)?,
        created_at: models::from_millis(row.get(6)?),
        updated_at: models::from_millis(row.get(7)?),
        sync_status: SyncStatus::Synced,
    })
}

/// Every row of one workspace, as needed for hashing or a pull snapshot
#[derive(Debug, Clone, Default)]
pub struct WorkspaceTree {
    pub workspace: Option<Workspace>,
    pub notes: Vec<Note>,
    pub blocks: Vec<Block>,
}

impl WorkspaceTree {
    pub fn hash(&self) -> String {
        crate::hash::workspace_hash(self.workspace.as_ref(), &self.notes, &self.blocks)
    }
}

/// Load a workspace with all its notes and their blocks.
///
/// Only the shared columns are read, so this works on either schema.
pub fn load_tree(
    conn: &Connection,
    workspace_id: Uuid,
    include_blocks: bool,
) -> rusqlite::Result<WorkspaceTree> {
    let id = workspace_id.to_string();

    let workspace = conn
        .query_row(
            &format!("SELECT {} FROM workspaces WHERE id = ?", WORKSPACE_COLUMNS),
            [&id],
            workspace_from_row,
        )
        .optional()?;

    let Some(workspace) = workspace else {
        return Ok(WorkspaceTree::default());
    };

    let notes = conn
        .prepare(&format!(
            "SELECT {} FROM notes WHERE workspace_id = ? ORDER BY created_at, id",
            NOTE_COLUMNS
        ))?
        .query_map([&id], note_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let blocks = if include_blocks {
        conn.prepare(&format!(
            "SELECT {} FROM blocks
             WHERE note_id IN (SELECT id FROM notes WHERE workspace_id = ?)
             ORDER BY note_id, order_index, id",
            BLOCK_COLUMNS
        ))?
        .query_map([&id], block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?
    } else {
        Vec::new()
    };

    Ok(WorkspaceTree {
        workspace: Some(workspace),
        notes,
        blocks,
    })
}
