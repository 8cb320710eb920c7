//! Workspace content hashing
//!
//! A workspace hash is a SHA-256 tree digest built bottom-up:
//!
//! ```text
//! block     = H(id | type | content | updated_at)
//! note      = H(id | title | updated_at | blocks... | children...)
//! workspace = H(id | name | updated_at | root notes...)
//! ```
//!
//! Blocks are concatenated in `order_index` order and child notes in
//! `(title, id)` order, so the result depends only on content and never on
//! the order rows come back from storage. Client and server both call
//! [`workspace_hash`] on rows they loaded themselves; equal content means
//! equal hashes without transferring any data.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::models::{Block, Note, Workspace};

/// Hash reported for a workspace that does not exist
pub const EMPTY_HASH: &str = "";

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Hash a single block
pub fn block_hash(block: &Block) -> String {
    digest(&[
        &block.id.to_string(),
        &block.block_type,
        &block.content,
        &block.updated_at.timestamp_millis().to_string(),
    ])
}

/// Compute the hash of every note reachable from a root of the forest.
///
/// `blocks` may contain blocks of notes outside `notes`; they are ignored.
/// A note whose parent is not part of `notes` (or is itself) counts as a
/// root. Notes caught in a parent cycle are unreachable and left out.
pub fn note_hashes(notes: &[Note], blocks: &[Block]) -> HashMap<Uuid, String> {
    let forest = Forest::new(notes, blocks);
    forest.hash_all()
}

/// Compute the hash of a workspace from its rows.
///
/// Returns [`EMPTY_HASH`] when the workspace is absent.
pub fn workspace_hash(workspace: Option<&Workspace>, notes: &[Note], blocks: &[Block]) -> String {
    let Some(workspace) = workspace else {
        return EMPTY_HASH.to_string();
    };

    let forest = Forest::new(notes, blocks);
    let hashes = forest.hash_all();

    let roots: String = forest
        .children_of(None)
        .iter()
        .filter_map(|note| hashes.get(&note.id))
        .map(String::as_str)
        .collect();

    digest(&[
        &workspace.id.to_string(),
        &workspace.name,
        &workspace.updated_at.timestamp_millis().to_string(),
        &roots,
    ])
}

/// Notes indexed by parent, with children and blocks already sorted
struct Forest<'a> {
    children: HashMap<Option<Uuid>, Vec<&'a Note>>,
    blocks: HashMap<Uuid, Vec<&'a Block>>,
    total: usize,
}

impl<'a> Forest<'a> {
    fn new(notes: &'a [Note], blocks: &'a [Block]) -> Self {
        let ids: HashSet<Uuid> = notes.iter().map(|n| n.id).collect();

        let mut children: HashMap<Option<Uuid>, Vec<&Note>> = HashMap::new();
        for note in notes {
            let parent = note.parent_id.filter(|p| *p != note.id && ids.contains(p));
            children.entry(parent).or_default().push(note);
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        }

        let mut by_note: HashMap<Uuid, Vec<&Block>> = HashMap::new();
        for block in blocks.iter().filter(|b| ids.contains(&b.note_id)) {
            by_note.entry(block.note_id).or_default().push(block);
        }
        for list in by_note.values_mut() {
            list.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));
        }

        Self {
            children,
            blocks: by_note,
            total: notes.len(),
        }
    }

    fn children_of(&self, parent: Option<Uuid>) -> &[&'a Note] {
        self.children.get(&parent).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Post-order walk with an explicit stack; depth is unbounded.
    fn hash_all(&self) -> HashMap<Uuid, String> {
        let mut hashes: HashMap<Uuid, String> = HashMap::with_capacity(self.total);
        let mut stack: Vec<(&Note, bool)> = self
            .children_of(None)
            .iter()
            .rev()
            .map(|note| (*note, false))
            .collect();

        while let Some((note, expanded)) = stack.pop() {
            if expanded {
                let hash = self.hash_note(note, &hashes);
                hashes.insert(note.id, hash);
                continue;
            }
            stack.push((note, true));
            for child in self.children_of(Some(note.id)).iter().rev() {
                stack.push((*child, false));
            }
        }

        if hashes.len() < self.total {
            warn!(
                "{} note(s) unreachable from a root (parent cycle), excluded from hash",
                self.total - hashes.len()
            );
        }

        hashes
    }

    fn hash_note(&self, note: &Note, computed: &HashMap<Uuid, String>) -> String {
        let blocks: String = self
            .blocks
            .get(&note.id)
            .into_iter()
            .flatten()
            .map(|b| block_hash(b))
            .collect();

        let children: String = self
            .children_of(Some(note.id))
            .iter()
            .filter_map(|child| computed.get(&child.id))
            .map(String::as_str)
            .collect();

        digest(&[
            &note.id.to_string(),
            &note.title,
            &note.updated_at.timestamp_millis().to_string(),
            &blocks,
            &children,
        ])
    }
}
