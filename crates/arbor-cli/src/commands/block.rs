//! Block command handlers

use anyhow::{bail, Context, Result};

use arbor_core::Store;

use super::{block_id, note_id};
use crate::output::{short_id, Output};

pub const DEFAULT_BLOCK_TYPE: &str = "text";

/// Add a block at `position` (default: end of the note)
pub fn add(
    store: &mut Store,
    note: String,
    content: String,
    block_type: String,
    position: Option<i64>,
    output: &Output,
) -> Result<()> {
    let note_uuid = note_id(store, &note)?;
    let block = store
        .add_block(note_uuid, &block_type, &content, position)
        .context("Failed to add block")?;

    output.success(&format!(
        "Added block {} at position {}",
        short_id(block.id),
        block.order_index
    ));
    if output.is_quiet() {
        println!("{}", block.id);
    }
    Ok(())
}

pub fn list(store: &Store, note: String, output: &Output) -> Result<()> {
    let note_uuid = note_id(store, &note)?;
    let blocks = store.list_blocks(note_uuid)?;
    output.print_blocks(&blocks);
    Ok(())
}

pub fn edit(
    store: &mut Store,
    id: String,
    content: Option<String>,
    block_type: Option<String>,
    output: &Output,
) -> Result<()> {
    if content.is_none() && block_type.is_none() {
        bail!("Nothing to change. Pass --content or --type.");
    }

    let uuid = block_id(store, &id)?;
    let mut block = store
        .get_block(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Block not found: {}", id))?;

    if let Some(content) = content {
        block.set_content(content);
    }
    if let Some(block_type) = block_type {
        block.set_block_type(block_type);
    }
    store.update_block(&block).context("Failed to update block")?;

    output.success(&format!("Updated block {}", short_id(uuid)));
    Ok(())
}

/// Move a block to a new position among its siblings
pub fn move_to(store: &mut Store, id: String, position: i64, output: &Output) -> Result<()> {
    let uuid = block_id(store, &id)?;
    store
        .move_block(uuid, position)
        .context("Failed to move block")?;

    output.success(&format!("Moved block {} to position {}", short_id(uuid), position));
    Ok(())
}

pub fn delete(store: &mut Store, id: String, output: &Output) -> Result<()> {
    let uuid = block_id(store, &id)?;
    store.delete_block(uuid).context("Failed to delete block")?;

    output.success(&format!("Deleted block {}", short_id(uuid)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use arbor_core::{Note, Workspace};

    fn setup() -> (Store, Note) {
        let mut store = Store::open_in_memory().unwrap();
        let ws = Workspace::new("me", "Home");
        store.create_workspace(&ws).unwrap();
        let note = Note::new(ws.id, None, "Page");
        store.create_note(&note).unwrap();
        (store, note)
    }

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    fn contents(store: &Store, note: &Note) -> Vec<String> {
        store
            .list_blocks(note.id)
            .unwrap()
            .into_iter()
            .map(|b| b.content)
            .collect()
    }

    #[test]
    fn test_add_move_and_delete_keep_order_contiguous() {
        let (mut store, note) = setup();
        let id = note.id.to_string();
        for text in ["one", "two", "three"] {
            add(&mut store, id.clone(), text.into(), DEFAULT_BLOCK_TYPE.into(), None, &quiet())
                .unwrap();
        }
        add(&mut store, id, "zero".into(), "heading".into(), Some(0), &quiet()).unwrap();
        assert_eq!(contents(&store, &note), ["zero", "one", "two", "three"]);

        let three = store.list_blocks(note.id).unwrap()[3].id;
        move_to(&mut store, three.to_string(), 1, &quiet()).unwrap();
        assert_eq!(contents(&store, &note), ["zero", "three", "one", "two"]);

        let zero = store.list_blocks(note.id).unwrap()[0].id;
        delete(&mut store, zero.to_string(), &quiet()).unwrap();
        let blocks = store.list_blocks(note.id).unwrap();
        let order: Vec<i64> = blocks.iter().map(|b| b.order_index).collect();
        assert_eq!(order, [0, 1, 2]);
    }

    #[test]
    fn test_edit_requires_a_change() {
        let (mut store, note) = setup();
        let block = store.add_block(note.id, "text", "draft", None).unwrap();

        assert!(edit(&mut store, block.id.to_string(), None, None, &quiet()).is_err());

        edit(
            &mut store,
            block.id.to_string(),
            Some("done".into()),
            Some("todo".into()),
            &quiet(),
        )
        .unwrap();
        let block = store.get_block(block.id).unwrap().unwrap();
        assert_eq!(block.content, "done");
        assert_eq!(block.block_type, "todo");
    }

    #[test]
    fn test_move_out_of_range_fails() {
        let (mut store, note) = setup();
        let block = store.add_block(note.id, "text", "only", None).unwrap();
        assert!(move_to(&mut store, block.id.to_string(), 5, &quiet()).is_err());
    }
}
