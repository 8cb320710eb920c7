//! Sync wire protocol
//!
//! JSON request/response bodies for the three sync endpoints, shared by the
//! client transport and the gateway:
//!
//! - `POST /sync/status`: workspace hashes in, mismatched workspace ids out
//! - `POST /sync/pull`: one workspace id in, full snapshot + fresh hash out
//! - `POST /sync/push`: batch of changes in, per-entity updates/conflicts out
//! - `GET /health`: unauthenticated heartbeat
//!
//! Entity payloads (`data` of a pushed change) are decoded into
//! [`EntityData`], whose per-kind structs list exactly the columns a client
//! may write. Anything else in the JSON object is ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Block, ChangeAction, EntityKind, Note, Workspace};

pub const STATUS_PATH: &str = "/sync/status";
pub const PULL_PATH: &str = "/sync/pull";
pub const PUSH_PATH: &str = "/sync/push";
pub const HEALTH_PATH: &str = "/health";

/// `POST /sync/status` request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusRequest {
    pub workspace_hashes: BTreeMap<Uuid, String>,
}

/// A workspace whose hash differs between client and server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mismatch {
    pub workspace_id: Uuid,
    pub required_entities: Vec<EntityKind>,
}

impl Mismatch {
    /// Mismatch that needs the whole subtree
    pub fn full(workspace_id: Uuid) -> Self {
        Self {
            workspace_id,
            required_entities: vec![EntityKind::Workspace, EntityKind::Note, EntityKind::Block],
        }
    }
}

/// `POST /sync/status` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub mismatches: Vec<Mismatch>,
    pub sync_token: String,
}

fn default_true() -> bool {
    true
}

/// `POST /sync/pull` request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequest {
    pub workspace_id: Uuid,
    #[serde(default = "default_true")]
    pub include_blocks: bool,
}

/// `POST /sync/pull` response.
///
/// `workspace` is `None` when the workspace does not exist on the server
/// (or belongs to someone else).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullResponse {
    pub workspace: Option<Workspace>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    pub hash: String,
}

/// One entity change in a push batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeItem {
    pub entity_type: EntityKind,
    pub action: ChangeAction,
    pub entity_id: Uuid,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Optimistic-concurrency baseline: the last server `updated_at` the
    /// client saw for this row
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub client_updated_at: Option<DateTime<Utc>>,
}

impl ChangeItem {
    /// A create or update carrying a whitelisted payload
    pub fn write(
        action: ChangeAction,
        entity_id: Uuid,
        data: &EntityData,
        baseline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            entity_type: data.kind(),
            action,
            entity_id,
            data: data.to_value(),
            client_updated_at: baseline,
        }
    }

    /// An unconditional delete
    pub fn delete(entity_type: EntityKind, entity_id: Uuid) -> Self {
        Self {
            entity_type,
            action: ChangeAction::Delete,
            entity_id,
            data: serde_json::Value::Null,
            client_updated_at: None,
        }
    }
}

/// `POST /sync/push` request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PushRequest {
    pub changes: Vec<ChangeItem>,
    #[serde(default)]
    pub sync_token: Option<String>,
}

/// A change the server applied
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushUpdate {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub action: ChangeAction,
    /// Server-assigned `updated_at` (absent for deletes)
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Why the server refused a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Row moved since the client's baseline
    Stale,
    /// Update of a row that does not exist
    NotFound,
    /// Create of an id that already exists
    AlreadyExists,
    /// Payload failed validation or ownership checks
    Invalid,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::Stale => "stale",
            ConflictReason::NotFound => "not_found",
            ConflictReason::AlreadyExists => "already_exists",
            ConflictReason::Invalid => "invalid",
        }
    }
}

/// A change the server refused
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushConflict {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub action: ChangeAction,
    pub reason: ConflictReason,
    pub message: String,
    /// Current server `updated_at` of the row, when it exists
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub server_updated_at: Option<DateTime<Utc>>,
}

/// `POST /sync/push` response
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PushResponse {
    pub updates: Vec<PushUpdate>,
    pub conflicts: Vec<PushConflict>,
    pub sync_token: String,
}

/// `GET /health` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub server_time: DateTime<Utc>,
}

/// Error body returned with any non-2xx status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

/// Client-writable workspace columns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceData {
    pub name: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Client-writable note columns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteData {
    pub workspace_id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Client-writable block columns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockData {
    pub note_id: Uuid,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub order_index: i64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Typed payload of a pushed create/update, one variant per entity kind
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Workspace(WorkspaceData),
    Note(NoteData),
    Block(BlockData),
}

impl EntityData {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityData::Workspace(_) => EntityKind::Workspace,
            EntityData::Note(_) => EntityKind::Note,
            EntityData::Block(_) => EntityKind::Block,
        }
    }

    /// Decode a `data` object for the given kind
    pub fn from_value(kind: EntityKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Workspace => EntityData::Workspace(serde_json::from_value(value)?),
            EntityKind::Note => EntityData::Note(serde_json::from_value(value)?),
            EntityKind::Block => EntityData::Block(serde_json::from_value(value)?),
        })
    }

    /// Decode a full entity snapshot (as stored in the change log)
    pub fn from_snapshot(kind: EntityKind, snapshot: &str) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Workspace => {
                EntityData::from(&serde_json::from_str::<Workspace>(snapshot)?)
            }
            EntityKind::Note => EntityData::from(&serde_json::from_str::<Note>(snapshot)?),
            EntityKind::Block => EntityData::from(&serde_json::from_str::<Block>(snapshot)?),
        })
    }

    pub fn to_value(&self) -> serde_json::Value {
        let value = match self {
            EntityData::Workspace(d) => serde_json::to_value(d),
            EntityData::Note(d) => serde_json::to_value(d),
            EntityData::Block(d) => serde_json::to_value(d),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

impl From<&Workspace> for EntityData {
    fn from(ws: &Workspace) -> Self {
        EntityData::Workspace(WorkspaceData {
            name: ws.name.clone(),
            is_favorite: ws.is_favorite,
            created_at: Some(ws.created_at),
        })
    }
}

impl From<&Note> for EntityData {
    fn from(note: &Note) -> Self {
        EntityData::Note(NoteData {
            workspace_id: note.workspace_id,
            parent_id: note.parent_id,
            title: note.title.clone(),
            content: note.content.clone(),
            is_favorite: note.is_favorite,
            created_at: Some(note.created_at),
        })
    }
}

impl From<&Block> for EntityData {
    fn from(block: &Block) -> Self {
        EntityData::Block(BlockData {
            note_id: block.note_id,
            block_type: block.block_type.clone(),
            content: block.content.clone(),
            metadata: block.metadata.clone(),
            order_index: block.order_index,
            created_at: Some(block.created_at),
        })
    }
}
