//! Storage layer
//!
//! SQLite schema, row mapping and typed storage errors for the local store.
//!
//! ## Architecture
//!
//! - **SQLite**: single file `arbor.db` in the data directory
//! - **Change log**: lives in the same database so a row mutation and its
//!   outbox entry commit in one transaction
//! - **Rows**: column lists and decoders shared with the sync gateway

pub mod error;
pub mod rows;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use rows::{load_tree, WorkspaceTree};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
