//! Note command handlers

use anyhow::{bail, Context, Result};

use arbor_core::{Note, Store};

use super::{note_id, workspace_id};
use crate::editor::{confirm, edit_text};
use crate::output::{short_id, Output};

/// Create a note, optionally under a parent note
pub fn create(
    store: &mut Store,
    workspace: String,
    title: String,
    parent: Option<String>,
    content: Option<String>,
    output: &Output,
) -> Result<()> {
    let ws_id = workspace_id(store, &workspace)?;
    let parent_id = parent.map(|p| note_id(store, &p)).transpose()?;

    let mut note = Note::new(ws_id, parent_id, title);
    if let Some(content) = content {
        note.set_content(content);
    }
    store.create_note(&note).context("Failed to create note")?;

    output.success(&format!("Created note: {}", note.id));
    output.print_note(&note, &[]);
    Ok(())
}

/// List the notes of a workspace as a tree
pub fn list(store: &Store, workspace: String, output: &Output) -> Result<()> {
    let ws_id = workspace_id(store, &workspace)?;
    let notes = store.list_notes(ws_id)?;
    output.print_notes(&notes);
    Ok(())
}

pub fn show(store: &Store, id: String, output: &Output) -> Result<()> {
    let uuid = note_id(store, &id)?;
    let note = store
        .get_note(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;
    let blocks = store.list_blocks(uuid)?;

    output.print_note(&note, &blocks);
    Ok(())
}

/// Change title and/or content. With neither given, opens the content in $EDITOR.
pub fn edit(
    store: &mut Store,
    id: String,
    title: Option<String>,
    content: Option<String>,
    output: &Output,
) -> Result<()> {
    let uuid = note_id(store, &id)?;
    let mut note = store
        .get_note(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;

    match (title, content) {
        (None, None) => {
            if !output.should_prompt() {
                bail!("Nothing to change. Pass --title or --content.");
            }
            let edited = edit_text(&note.content)?;
            if edited == note.content {
                output.message("No changes.");
                return Ok(());
            }
            note.set_content(edited);
        }
        (title, content) => {
            if let Some(title) = title {
                note.set_title(title);
            }
            if let Some(content) = content {
                note.set_content(content);
            }
        }
    }

    store.update_note(&note).context("Failed to update note")?;
    output.success(&format!("Updated note: {}", note.title));
    Ok(())
}

/// Re-parent a note; no parent moves it to the workspace root
pub fn move_to(store: &mut Store, id: String, parent: Option<String>, output: &Output) -> Result<()> {
    let uuid = note_id(store, &id)?;
    let parent_id = parent.map(|p| note_id(store, &p)).transpose()?;

    store
        .move_note(uuid, parent_id)
        .context("Failed to move note")?;

    match parent_id {
        Some(parent) => output.success(&format!(
            "Moved note {} under {}",
            short_id(uuid),
            short_id(parent)
        )),
        None => output.success(&format!("Moved note {} to the workspace root", short_id(uuid))),
    }
    Ok(())
}

pub fn favorite(store: &mut Store, id: String, on: bool, output: &Output) -> Result<()> {
    let uuid = note_id(store, &id)?;
    let mut note = store
        .get_note(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;

    note.set_favorite(on);
    store.update_note(&note)?;

    output.success(&format!(
        "{} note {}",
        if on { "Pinned" } else { "Unpinned" },
        note.title
    ));
    Ok(())
}

/// Delete a note with its sub-notes and blocks
pub fn delete(store: &mut Store, id: String, yes: bool, output: &Output) -> Result<()> {
    let uuid = note_id(store, &id)?;
    let note = store
        .get_note(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;

    if output.should_prompt() && !yes {
        let children = store
            .list_notes(note.workspace_id)?
            .iter()
            .filter(|n| n.parent_id == Some(uuid))
            .count();
        println!("Delete note: {} - {}", short_id(note.id), note.title);
        if children > 0 {
            println!("This also deletes {} sub-note(s) and their blocks.", children);
        }
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.delete_note(uuid).context("Failed to delete note")?;
    output.success(&format!("Deleted note: {}", note.title));
    Ok(())
}
