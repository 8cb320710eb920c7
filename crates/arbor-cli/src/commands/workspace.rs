//! Workspace command handlers

use anyhow::{Context, Result};

use arbor_core::{Config, Store, Workspace};

use super::workspace_id;
use crate::editor::confirm;
use crate::output::{short_id, Output, OutputFormat};

/// Create a workspace owned by the configured user
pub fn create(store: &mut Store, config: &Config, name: String, output: &Output) -> Result<()> {
    let ws = Workspace::new(config.owner_id(), name);
    store
        .create_workspace(&ws)
        .context("Failed to create workspace")?;

    output.success(&format!("Created workspace: {}", ws.id));
    output.print_workspace(&ws);
    Ok(())
}

pub fn list(store: &Store, output: &Output) -> Result<()> {
    let workspaces = store.list_workspaces()?;
    output.print_workspaces(&workspaces);
    Ok(())
}

/// Show a workspace and its note tree
pub fn show(store: &Store, id: String, output: &Output) -> Result<()> {
    let uuid = workspace_id(store, &id)?;
    let ws = store
        .get_workspace(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Workspace not found: {}", id))?;
    let notes = store.list_notes(uuid)?;

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "workspace": ws,
                "notes": notes,
                "hash": store.compute_workspace_hash(uuid)?,
            }));
        }
        OutputFormat::Quiet => println!("{}", ws.id),
        OutputFormat::Human => {
            output.print_workspace(&ws);
            println!();
            output.print_notes(&notes);
        }
    }
    Ok(())
}

pub fn rename(store: &mut Store, id: String, name: String, output: &Output) -> Result<()> {
    let uuid = workspace_id(store, &id)?;
    let mut ws = store
        .get_workspace(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Workspace not found: {}", id))?;

    ws.set_name(name);
    store
        .update_workspace(&ws)
        .context("Failed to rename workspace")?;

    output.success(&format!("Renamed workspace {} to {}", short_id(ws.id), ws.name));
    Ok(())
}

pub fn favorite(store: &mut Store, id: String, on: bool, output: &Output) -> Result<()> {
    let uuid = workspace_id(store, &id)?;
    let mut ws = store
        .get_workspace(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Workspace not found: {}", id))?;

    ws.set_favorite(on);
    store.update_workspace(&ws)?;

    output.success(&format!(
        "{} workspace {}",
        if on { "Pinned" } else { "Unpinned" },
        ws.name
    ));
    Ok(())
}

/// Delete a workspace with all its notes and blocks
pub fn delete(store: &mut Store, id: String, yes: bool, output: &Output) -> Result<()> {
    let uuid = workspace_id(store, &id)?;
    let ws = store
        .get_workspace(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Workspace not found: {}", id))?;

    if output.should_prompt() && !yes {
        let notes = store.list_notes(uuid)?.len();
        println!(
            "Delete workspace: {} - {} ({} note(s))",
            short_id(ws.id),
            ws.name,
            notes
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store
        .delete_workspace(uuid)
        .context("Failed to delete workspace")?;
    output.success(&format!("Deleted workspace: {}", ws.name));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    #[test]
    fn test_create_uses_configured_owner() {
        let mut store = Store::open_in_memory().unwrap();
        let config = Config {
            user_id: Some("alice".to_string()),
            ..Config::default()
        };

        create(&mut store, &config, "Home".to_string(), &quiet()).unwrap();

        let workspaces = store.list_workspaces().unwrap();
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].user_id, "alice");
        assert_eq!(workspaces[0].name, "Home");
    }

    #[test]
    fn test_rename_and_delete_by_prefix() {
        let mut store = Store::open_in_memory().unwrap();
        let ws = Workspace::new("me", "Old");
        store.create_workspace(&ws).unwrap();
        let prefix = ws.id.to_string()[..8].to_string();

        rename(&mut store, prefix.clone(), "New".to_string(), &quiet()).unwrap();
        assert_eq!(store.get_workspace(ws.id).unwrap().unwrap().name, "New");

        favorite(&mut store, prefix.clone(), true, &quiet()).unwrap();
        assert!(store.get_workspace(ws.id).unwrap().unwrap().is_favorite);

        delete(&mut store, prefix, true, &quiet()).unwrap();
        assert!(store.get_workspace(ws.id).unwrap().is_none());
    }
}
