//! Arbor Core Library
//!
//! This crate provides the core functionality for Arbor, a local-first
//! outliner that keeps workspaces of nested notes and blocks on every device
//! and syncs them through a small server.
//!
//! # Architecture
//!
//! - **SQLite**: source of truth on each device; every mutation also lands
//!   in a change log in the same transaction
//! - **Hashes**: each workspace has a deterministic content hash, so client
//!   and server can tell cheaply whether they agree
//! - **Sync engine**: pushes the change log, compares hashes, pulls and
//!   merges what differs
//!
//! # Quick Start
//!
//! ```text
//! let mut store = Store::open(&config)?;
//!
//! let ws = Workspace::new(config.owner_id(), "Personal");
//! store.create_workspace(&ws)?;
//!
//! let note = Note::new(ws.id, None, "Groceries");
//! store.create_note(&note)?;
//! store.add_block(note.id, "todo", "milk", None)?;
//! ```
//!
//! # Modules
//!
//! - `store`: Local storage interface (main entry point)
//! - `models`: Workspaces, notes, blocks and change-log entries
//! - `changelog`: Outbox of local mutations awaiting push
//! - `hash`: Workspace content hashing
//! - `protocol`: Wire types shared with the server
//! - `storage`: SQLite schema and row mapping
//! - `sync`: Transport, driver, merge and scheduler
//! - `config`: Application configuration

pub mod changelog;
pub mod config;
pub mod hash;
pub mod models;
pub mod protocol;
pub mod storage;
pub mod store;
pub mod sync;

pub use changelog::{ChangeLog, ChangeLogCounts};
pub use config::Config;
pub use models::{
    Block, ChangeAction, ChangeLogEntry, ChangeStatus, EntityKind, Note, SyncStatus, Workspace,
};
pub use storage::{StorageError, StorageResult, WorkspaceTree};
pub use store::{ConflictRow, Store, StoreStats};
