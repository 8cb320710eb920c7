//! Status command handler

use anyhow::Result;

use arbor_core::sync::SyncState;
use arbor_core::{Config, Store};

use crate::output::{Output, OutputFormat};

/// Show store contents, pending changes and the last sync outcome
pub fn show(store: &Store, config: &Config, output: &Output) -> Result<()> {
    let stats = store.stats()?;
    let state = SyncState::with_path(config.sync_state_path());

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "database": config.database_path(),
                "sync_enabled": config.sync_enabled,
                "sync_url": config.sync_url,
                "user_id": config.user_id,
                "logged_in": config.auth_token.is_some(),
                "counts": stats,
                "last_sync": state,
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", stats.pending_changes);
        }
        OutputFormat::Human => {
            println!("Arbor Status");
            println!("============");
            println!();
            println!("Storage:");
            println!("  Database: {}", config.database_path().display());
            println!();
            println!("Contents:");
            println!("  Workspaces: {}", stats.workspaces);
            println!("  Notes:      {}", stats.notes);
            println!("  Blocks:     {}", stats.blocks);
            println!();
            println!("Sync:");
            println!(
                "  Status:  {}",
                if config.is_sync_configured() {
                    "enabled"
                } else if config.sync_enabled {
                    "enabled (incomplete, run `arbor login`)"
                } else {
                    "disabled"
                }
            );
            if let Some(ref url) = config.sync_url {
                println!("  Server:  {}", url);
            }
            if let Some(ref user) = config.user_id {
                println!("  User:    {}", user);
            }
            println!("  Pending: {}", stats.pending_changes);
            if stats.failed_changes > 0 {
                println!("  Failed:  {}", stats.failed_changes);
            }
            if stats.conflicts > 0 {
                println!(
                    "  Conflicts: {} (see `arbor conflicts`)",
                    stats.conflicts
                );
            }
            match state.last_success_at {
                Some(at) => println!("  Last sync: {}", at.format("%Y-%m-%d %H:%M:%S")),
                None => println!("  Last sync: never"),
            }
            if let Some(ref err) = state.last_error {
                println!("  Last error: {}", err);
            }
        }
    }

    Ok(())
}
