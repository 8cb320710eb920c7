//! What the client remembers between sync runs
//!
//! The last token the server issued and how the most recent run went, kept
//! as JSON next to the database.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Persistent sync state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Opaque token from the last status/push response
    #[serde(default)]
    pub sync_token: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Path to persist state
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl SyncState {
    /// State that is never written to disk
    pub fn new() -> Self {
        Self::default()
    }

     /// State backed by `path`. A file that cannot be parsed is logged and
    /// replaced by a fresh state.
    pub fn with_path(path: PathBuf) -> Self {
        let mut state = match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!("Ignoring corrupt sync state {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        state.path = Some(path);
        state
    }

    /// Write to the backing file, if there is one
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create {}", dir.display()))?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Could not write {}", path.display()))
    }

   /// Record the outcome of a run
    pub fn record_run(&mut self, at: DateTime<Utc>, error: Option<String>) {
        self.last_attempt_at = Some(at);
        if error.is_none() {
            self.last_success_at = Some(at);
        }
        self.last_error = error;
    }

    /// Forget everything (used on logout)
    pub fn clear(&mut self) {
        let path = self.path.take();
        *self = Self::default();
        self.path = path;
    }
}
