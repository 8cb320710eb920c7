//! Data models for Arbor
//!
//! Defines the document tree (Workspace → Note → Block), the per-row sync
//! status, and the change log entry that records local mutations.
//!
//! Timestamps carry millisecond precision everywhere. They are stored as
//! epoch milliseconds in SQLite and serialized the same way on the wire, so a
//! value survives a push/pull round trip unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time truncated to millisecond precision
pub fn now() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Convert epoch milliseconds to a UTC timestamp
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Error returned when parsing one of the string-encoded enums fails
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Local synchronization state of a row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Row matches what the server last confirmed
    #[default]
    Synced,
    /// Local edit not yet confirmed by the server
    Pending,
    /// Server rejected the last local edit; waiting for the user
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
        }
    }

    /// Whether an incoming pull must leave this row alone
    pub fn is_protected(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Conflict)
    }
}

impl FromStr for SyncStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            "conflict" => Ok(SyncStatus::Conflict),
            other => Err(ParseEnumError::new("sync status", other)),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three kinds of entity in a document tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Workspace,
    Note,
    Block,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Workspace => "workspace",
            EntityKind::Note => "note",
            EntityKind::Block => "block",
        }
    }

    /// SQL table holding rows of this kind (same name locally and remotely)
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Workspace => "workspaces",
            EntityKind::Note => "notes",
            EntityKind::Block => "blocks",
        }
    }
}

impl FromStr for EntityKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workspace" => Ok(EntityKind::Workspace),
            "note" => Ok(EntityKind::Note),
            "block" => Ok(EntityKind::Block),
            other => Err(ParseEnumError::new("entity type", other)),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a change did to its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl FromStr for ChangeAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeAction::Create),
            "update" => Ok(ChangeAction::Update),
            "delete" => Ok(ChangeAction::Delete),
            other => Err(ParseEnumError::new("action", other)),
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a change log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Success,
    Error,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Success => "success",
            ChangeStatus::Error => "error",
        }
    }
}

impl FromStr for ChangeStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChangeStatus::Pending),
            "success" => Ok(ChangeStatus::Success),
            "error" => Ok(ChangeStatus::Error),
            other => Err(ParseEnumError::new("change status", other)),
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root of a document tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Display name
    pub name: String,
    /// Pinned in the sidebar
    pub is_favorite: bool,
    /// When this workspace was created
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// When this workspace was last updated
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Local sync state (never sent over the wire)
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl Workspace {
    /// Create a new workspace owned by `user_id`
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            is_favorite: false,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Rename the workspace
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    /// Set the favorite flag
    pub fn set_favorite(&mut self, favorite: bool) {
        self.is_favorite = favorite;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now();
    }
}

/// Hierarchical document node inside a workspace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    /// Unique identifier
    pub id: Uuid,
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Parent note, `None` for root-level notes
    pub parent_id: Option<Uuid>,
    /// Note title
    pub title: String,
    /// Free-text content
    pub content: String,
    /// Pinned in the sidebar
    pub is_favorite: bool,
    /// When this note was created
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// When this note was last updated
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Local sync state (never sent over the wire)
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl Note {
    /// Create a new note in a workspace
    pub fn new(workspace_id: Uuid, parent_id: Option<Uuid>, title: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            parent_id,
            title: title.into(),
            content: String::new(),
            is_favorite: false,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Update the title
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    /// Update the content
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.touch();
    }

    /// Re-parent the note (no cycle check here, see `Store::move_note`)
    pub fn set_parent(&mut self, parent_id: Option<Uuid>) {
        self.parent_id = parent_id;
        self.touch();
    }

    /// Set the favorite flag
    pub fn set_favorite(&mut self, favorite: bool) {
        self.is_favorite = favorite;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now();
    }
}

/// Smallest addressable content unit within a note
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    /// Unique identifier
    pub id: Uuid,
    /// Owning note
    pub note_id: Uuid,
    /// Type tag (e.g. "text", "heading", "todo")
    #[serde(rename = "type")]
    pub block_type: String,
    /// Block content
    pub content: String,
    /// Free-form metadata blob
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Position among the note's blocks, contiguous from 0
    pub order_index: i64,
    /// When this block was created
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// When this block was last updated
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Local sync state (never sent over the wire)
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl Block {
    /// Create a new block at the given position
    pub fn new(
        note_id: Uuid,
        block_type: impl Into<String>,
        content: impl Into<String>,
        order_index: i64,
    ) -> Self {
        let now = now();
        Self {
            id: Uuid::new_v4(),
            note_id,
            block_type: block_type.into(),
            content: content.into(),
            metadata: serde_json::Value::Null,
            order_index,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Update the content
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.touch();
    }

    /// Change the type tag
    pub fn set_block_type(&mut self, block_type: impl Into<String>) {
        self.block_type = block_type.into();
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now();
    }
}

/// One recorded local mutation awaiting delivery to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeLogEntry {
    /// Monotonic local id (FIFO tie-breaker)
    pub id: i64,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub action: ChangeAction,
    pub status: ChangeStatus,
    /// JSON snapshot of the entity at mutation time (`null` for deletes)
    pub payload: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}
