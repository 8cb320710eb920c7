//! Login and logout
//!
//! There is no interactive login flow: the server operator hands out a
//! bearer token per user, and `arbor login` stores it with the server URL.

use std::path::Path;

use anyhow::{Context, Result};

use arbor_core::sync::{HttpTransport, SyncState, SyncTransport};
use arbor_core::Config;

use super::config::effective_path;
use crate::output::Output;

/// Store server URL, user id and token, enable sync, then probe the server
pub async fn login(
    config_path: Option<&Path>,
    url: String,
    user: String,
    token: String,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let switching_user = config.user_id.as_deref().is_some_and(|current| current != user);

    config.sync_url = Some(url.trim_end_matches('/').to_string());
    config.user_id = Some(user.clone());
    config.auth_token = Some(token);
    config.sync_enabled = true;
    config
        .save_to_path(&effective_path(config_path))
        .context("Failed to save configuration")?;

    if switching_user {
        // The stored sync token belongs to the previous account
        let mut state = SyncState::with_path(config.sync_state_path());
        state.clear();
        state.save()?;
    }

    output.success(&format!("Logged in as {}", user));

    let transport = HttpTransport::from_config(&config)?;
    match transport.heartbeat().await {
        Ok(health) => output.message(&format!(
            "Server {} is reachable (server time {})",
            transport.base_url(),
            health.server_time.format("%Y-%m-%d %H:%M:%S")
        )),
        Err(e) => output.message(&format!(
            "Warning: server {} is not reachable right now: {}",
            transport.base_url(),
            e
        )),
    }
    Ok(())
}

/// Forget the token and the sync state. Local data stays.
pub fn logout(config_path: Option<&Path>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    config.auth_token = None;
    config
        .save_to_path(&effective_path(config_path))
        .context("Failed to save configuration")?;

    let mut state = SyncState::with_path(config.sync_state_path());
    state.clear();
    state.save()?;

    output.success("Logged out. Local data was kept.");
    Ok(())
}
