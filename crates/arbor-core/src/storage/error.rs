//! Errors raised by the local store

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::models::EntityKind;

/// ENOSPC on Linux and macOS
const ENOSPC: i32 = 28;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Could not create data directory {path:?}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No permission to use {path:?}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of disk space writing {path:?}")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Entity does not exist locally
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    /// Moving a note would make it its own ancestor
    #[error("Cannot move note {note_id} under {parent_id}: that would create a cycle")]
    CycleDetected { note_id: Uuid, parent_id: Uuid },

    /// Parent note lives in another workspace
    #[error("Parent note {parent_id} does not belong to workspace {workspace_id}")]
    ParentOutsideWorkspace { parent_id: Uuid, workspace_id: Uuid },

    /// Block position outside the note's range
    #[error("Position {position} is out of range (note has {len} block(s))")]
    InvalidPosition { position: i64, len: usize },

    /// Operation refused because it would discard unsynced local work
    #[error("{kind} {id} has local changes that have not been pushed yet")]
    PendingChanges { kind: EntityKind, id: Uuid },

    /// A stored value could not be decoded
    #[error("Corrupt {what} in local database: {details}")]
    Corrupt { what: &'static str, details: String },

    #[error("SQLite: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Attach the path that failed and sort the error into a variant
    pub fn from_io(source: io::Error, path: PathBuf) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            StorageError::PermissionDenied { path, source }
        } else if source.kind() == io::ErrorKind::StorageFull
            || source.raw_os_error() == Some(ENOSPC)
        {
            StorageError::DiskFull { path, source }
        } else {
            StorageError::CreateDirectory { path, source }
        }
    }

    pub fn not_found(kind: EntityKind, id: Uuid) -> Self {
        StorageError::NotFound { kind, id }
    }

    /// The user can fix this without touching the database
    pub fn is_recoverable(&self) -> bool {
        self.recovery_suggestion().is_some()
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        Some(match self {
            StorageError::DiskFull { .. } => "Free some disk space and run the command again.",
            StorageError::PermissionDenied { .. } => {
                "Make the data directory writable by the current user, or point data_dir elsewhere."
            }
            StorageError::CreateDirectory { .. } => {
                "Set data_dir to a location whose parent exists."
            }
            StorageError::PendingChanges { .. } => {
                "Run `arbor sync` first, then resolve the conflict again."
            }
            _ => return None,
        })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
