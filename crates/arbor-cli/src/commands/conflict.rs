//! Conflict listing and resolution

use anyhow::{Context, Result};
use clap::ValueEnum;

use arbor_core::Store;

use super::match_prefix;
use crate::output::{short_id, Output};

/// Which side of a conflict wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Keep {
    /// Push the local copy over the server's on the next sync
    Local,
    /// Take the server copy on the next pull
    Remote,
}

pub fn list(store: &Store, output: &Output) -> Result<()> {
    let conflicts = store.list_conflicts()?;
    output.print_conflicts(&conflicts);
    Ok(())
}

pub fn resolve(store: &mut Store, id: String, keep: Keep, output: &Output) -> Result<()> {
    let conflicts = store.list_conflicts()?;
    let uuid = match_prefix(&id, "conflict", &conflicts, |c| c.entity_id, |c| c.label.as_str())?;
    let row = conflicts
        .iter()
        .find(|c| c.entity_id == uuid)
        .ok_or_else(|| anyhow::anyhow!("{} is not in conflict", id))?;

    match keep {
        Keep::Local => store.resolve_keep_local(row.entity_type, uuid),
        Keep::Remote => store.resolve_keep_remote(row.entity_type, uuid),
    }
    .with_context(|| format!("Failed to resolve {} {}", row.entity_type, short_id(uuid)))?;

    output.success(&format!(
        "Resolved {} {}: keeping the {} copy. Run `arbor sync` to apply.",
        row.entity_type,
        short_id(uuid),
        match keep {
            Keep::Local => "local",
            Keep::Remote => "server",
        }
    ));
    Ok(())
}
