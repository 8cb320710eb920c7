//! Command handlers

pub mod auth;
pub mod block;
pub mod config;
pub mod conflict;
pub mod log;
pub mod note;
pub mod status;
pub mod sync;
pub mod workspace;

use anyhow::{bail, Result};
use uuid::Uuid;

use arbor_core::Store;

/// Resolve a full UUID or a unique prefix against `candidates`
fn match_prefix<T>(
    input: &str,
    kind: &str,
    candidates: &[T],
    id_of: impl Fn(&T) -> Uuid,
    label_of: impl Fn(&T) -> &str,
) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(input) {
        return Ok(uuid);
    }
    if input.is_empty() {
        bail!("Empty {} ID", kind);
    }

    let matches: Vec<&T> = candidates
        .iter()
        .filter(|c| id_of(c).to_string().starts_with(input))
        .collect();

    match matches.len() {
        0 => bail!("No {} found matching: {}", kind, input),
        1 => Ok(id_of(matches[0])),
        _ => {
            eprintln!("Multiple {}s match '{}':", kind, input);
            for candidate in &matches {
                eprintln!("  {} - {}", id_of(candidate), label_of(candidate));
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

pub fn workspace_id(store: &Store, input: &str) -> Result<Uuid> {
    let workspaces = store.list_workspaces()?;
    match_prefix(input, "workspace", &workspaces, |w| w.id, |w| w.name.as_str())
}

pub fn note_id(store: &Store, input: &str) -> Result<Uuid> {
    let mut notes = Vec::new();
    for ws in store.list_workspaces()? {
        notes.extend(store.list_notes(ws.id)?);
    }
    match_prefix(input, "note", &notes, |n| n.id, |n| n.title.as_str())
}

pub fn block_id(store: &Store, input: &str) -> Result<Uuid> {
    let mut blocks = Vec::new();
    for ws in store.list_workspaces()? {
        for note in store.list_notes(ws.id)? {
            blocks.extend(store.list_blocks(note.id)?);
        }
    }
    match_prefix(input, "block", &blocks, |b| b.id, |b| b.content.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{Note, Workspace};

    fn store_with_workspaces(names: &[&str]) -> (Store, Vec<Workspace>) {
        let mut store = Store::open_in_memory().unwrap();
        let workspaces: Vec<Workspace> = names.iter().map(|n| Workspace::new("me", *n)).collect();
        for ws in &workspaces {
            store.create_workspace(ws).unwrap();
        }
        (store, workspaces)
    }

    #[test]
    fn test_full_uuid_is_accepted_verbatim() {
        let (store, _) = store_with_workspaces(&[]);
        let id = Uuid::new_v4();
        assert_eq!(workspace_id(&store, &id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_unique_prefix_resolves() {
        let (store, workspaces) = store_with_workspaces(&["Home"]);
        let id = workspaces[0].id;
        let prefix = &id.to_string()[..6];
        assert_eq!(workspace_id(&store, prefix).unwrap(), id);
    }

    #[test]
    fn test_unknown_prefix_fails() {
        let (store, workspaces) = store_with_workspaces(&["Home"]);
        let first = workspaces[0].id.to_string().chars().next().unwrap();
        let other = if first == 'z' { "y" } else { "z" };
        assert!(workspace_id(&store, other).is_err());
        assert!(workspace_id(&store, "").is_err());
    }

    #[test]
    fn test_ambiguous_prefix_fails() {
        struct Item(Uuid, String);
        let a = Uuid::parse_str("aaaa0000-0000-4000-8000-000000000001").unwrap();
        let b = Uuid::parse_str("aaaa0000-0000-4000-8000-000000000002").unwrap();
        let items = vec![Item(a, "one".into()), Item(b, "two".into())];

        let result = match_prefix("aaaa", "item", &items, |i| i.0, |i| i.1.as_str());
        assert!(result.is_err());
        assert_eq!(
            match_prefix("aaaa0000-0000-4000-8000-000000000002", "item", &items, |i| i.0, |i| i.1.as_str())
                .unwrap(),
            b
        );
    }

    #[test]
    fn test_note_and_block_lookup_span_workspaces() {
        let (mut store, workspaces) = store_with_workspaces(&["A", "B"]);
        let note = Note::new(workspaces[1].id, None, "Deep");
        store.create_note(&note).unwrap();
        let block = store.add_block(note.id, "text", "hello", None).unwrap();

        assert_eq!(note_id(&store, &note.id.to_string()[..8]).unwrap(), note.id);
        assert_eq!(block_id(&store, &block.id.to_string()[..8]).unwrap(), block.id);
    }
}
