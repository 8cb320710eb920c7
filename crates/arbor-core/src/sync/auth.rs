//! Authentication collaborator and session flags
//!
//! The sync engine never performs a login itself. It asks an [`Auth`]
//! implementation for a bearer credential and the user id, and calls
//! [`Auth::invalidate`] when the server rejects the credential. Scheduling
//! stays paused until a new credential is supplied.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::config::Config;

/// Supplies credentials to the sync engine
pub trait Auth: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Bearer token for the sync server
    fn credential(&self) -> Option<String>;

    fn user_id(&self) -> Option<String>;

    /// Mark the current credential as rejected
    fn invalidate(&self);
}

/// Static bearer token taken from configuration
#[derive(Debug)]
pub struct TokenAuth {
    token: Option<String>,
    user_id: Option<String>,
    invalid: AtomicBool,
}

impl TokenAuth {
    pub fn new(token: Option<String>, user_id: Option<String>) -> Self {
        Self {
            token,
            user_id,
            invalid: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.auth_token.clone(), config.user_id.clone())
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalid.load(Ordering::SeqCst)
    }
}

impl Auth for TokenAuth {
    fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.user_id.is_some() && !self.is_invalidated()
    }

    fn credential(&self) -> Option<String> {
        if self.is_invalidated() {
            return None;
        }
        self.token.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn invalidate(&self) {
        self.invalid.store(true, Ordering::SeqCst);
    }
}

impl<A: Auth + ?Sized> Auth for std::sync::Arc<A> {
    fn is_authenticated(&self) -> bool {
        (**self).is_authenticated()
    }

    fn credential(&self) -> Option<String> {
        (**self).credential()
    }

    fn user_id(&self) -> Option<String> {
        (**self).user_id()
    }

    fn invalidate(&self) {
        (**self).invalidate()
    }
}

/// Online/auth flags, updated at run boundaries
#[derive(Debug, Default)]
pub struct SessionState {
    online: AtomicBool,
    auth_invalid: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_auth_invalid(&self, invalid: bool) {
        self.auth_invalid.store(invalid, Ordering::SeqCst);
    }

    pub fn is_auth_invalid(&self) -> bool {
        self.auth_invalid.load(Ordering::SeqCst)
    }
}

/// Snapshot handed to a single sync run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub credential: String,
    pub user_id: String,
    /// Token from the previous successful exchange, if any
    pub sync_token: Option<String>,
    pub started_at: DateTime<Utc>,
}
