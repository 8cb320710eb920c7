//! Arbor sync server
//!
//! Stores every user's workspaces in SQLite and answers the three sync
//! endpoints. Row versions (`updated_at`) are issued here; clients echo the
//! last one they saw when they push an update.
//!
//! # Modules
//!
//! - `gateway`: status/pull/push logic behind the routes
//! - `db`: schema, batch application and the workspace hash cache
//! - `routes`: axum router and handlers
//! - `config`: server configuration
//! - `error`: request-level errors and their HTTP mapping

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod routes;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

pub use config::ServerConfig;
pub use db::ServerDb;
pub use error::{ApiError, ApiResult};
pub use gateway::Gateway;
pub use routes::create_router;

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("Arbor sync server listening on {}", addr);

    axum::serve(listener, create_router(gateway))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server failed")?;

    info!("Arbor sync server stopped");
    Ok(())
}
