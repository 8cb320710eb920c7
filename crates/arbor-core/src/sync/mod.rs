//! Sync engine
//!
//! Keeps the local store and the sync server converging over a small JSON
//! protocol (see [`crate::protocol`]).
//!
//! ## Run phases
//!
//! 1. **Push**: pending change-log entries, coalesced per entity, go out in
//!    one batch; the server answers each one with an update or a conflict
//! 2. **Status**: one hash per local workspace; the server lists the
//!    workspaces that differ
//! 3. **Pull**: each mismatched workspace is fetched whole and merged;
//!    newer timestamps win, unpushed local edits are never overwritten
//!
//! ## Usage
//!
//! ```ignore
//! let transport = HttpTransport::from_config(&config)?;
//! let auth = TokenAuth::from_config(&config);
//! let driver = SyncDriver::new(store, transport, auth)
//!     .with_state(SyncState::with_path(config.sync_state_path()));
//! let (mut scheduler, events) = Scheduler::new(driver);
//! scheduler.start(config.sync_interval());
//! ```

mod auth;
mod driver;
mod error;
pub(crate) mod merge;
mod scheduler;
mod state;
mod transport;

#[cfg(test)]
mod mock;

pub use auth::{Auth, RunContext, SessionState, TokenAuth};
pub use driver::{PhaseError, SyncDriver, SyncPhase, SyncReport};
pub use error::{SyncError, SyncResult};
pub use merge::MergeStats;
pub use scheduler::{RunOutcome, Scheduler, SchedulerEvent, SkipReason};
pub use state::SyncState;
pub use transport::{HttpTransport, RetryConfig, SyncTransport};
