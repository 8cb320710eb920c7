//! Pull merge planning
//!
//! Turns a server snapshot of one workspace plus the local rows into a
//! [`MergePlan`]: which rows to insert, overwrite or delete. Planning is
//! pure; the store executes the plan inside a single transaction.
//!
//! Rules per entity:
//!
//! - absent locally: insert, unless a pending change-log entry exists for it
//!   (a local delete waiting to be pushed must not be undone)
//! - present and `pending`/`conflict`, or with a pending entry: skip
//! - present and synced: overwrite only if the server copy is strictly newer
//! - present locally but missing from the server: delete, unless the row or
//!   something underneath it still holds unsynced work

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Block, Note, SyncStatus, Workspace};
use crate::storage::WorkspaceTree;

/// Row counts touched by a merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
}

impl MergeStats {
    pub fn total_applied(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
    }
}

/// What to do with one incoming row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Overwrite,
    /// Local copy is at least as new
    Unchanged,
    /// Local work must win for now
    Skip,
}

/// Sync-relevant facts about a local row
#[derive(Debug, Clone, Copy)]
pub struct LocalRow {
    pub status: SyncStatus,
    pub updated_at: DateTime<Utc>,
}

/// Decide how to merge one incoming row
pub fn decide(local: Option<LocalRow>, remote_updated_at: DateTime<Utc>, has_pending: bool) -> Decision {
    match local {
        None if has_pending => Decision::Skip,
        None => Decision::Insert,
        Some(row) if row.status.is_protected() || has_pending => Decision::Skip,
        Some(row) if remote_updated_at > row.updated_at => Decision::Overwrite,
        Some(_) => Decision::Unchanged,
    }
}

/// Rows to write and delete for one workspace
#[derive(Debug, Default)]
pub struct MergePlan {
    pub workspace: Option<Workspace>,
    /// Parent-first, so every parent exists before its children are written
    pub notes: Vec<Note>,
    pub blocks: Vec<Block>,
    pub delete_workspace: bool,
    pub delete_notes: Vec<Uuid>,
    pub delete_blocks: Vec<Uuid>,
    pub stats: MergeStats,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.workspace.is_none()
            && self.notes.is_empty()
            && self.blocks.is_empty()
            && !self.delete_workspace
            && self.delete_notes.is_empty()
            && self.delete_blocks.is_empty()
    }
}

/// Plan the merge of a server snapshot into the local rows of one workspace.
///
/// `local` must carry real `sync_status` values. `pending` holds every
/// entity id with a pending change-log entry. When `include_blocks` is false
/// the snapshot says nothing about blocks and local blocks are left alone.
pub fn plan_merge(
    local: &WorkspaceTree,
    remote: &WorkspaceTree,
    pending: &HashSet<Uuid>,
    include_blocks: bool,
) -> MergePlan {
    let mut plan = MergePlan::default();

    let Some(remote_ws) = remote.workspace.as_ref() else {
        plan_workspace_removal(local, pending, &mut plan);
        return plan;
    };

    let local_ws = local.workspace.as_ref().map(|ws| LocalRow {
        status: ws.sync_status,
        updated_at: ws.updated_at,
    });
    match decide(local_ws, remote_ws.updated_at, pending.contains(&remote_ws.id)) {
        Decision::Insert => {
            plan.workspace = Some(remote_ws.clone());
            plan.stats.inserted += 1;
        }
        Decision::Overwrite => {
            plan.workspace = Some(remote_ws.clone());
            plan.stats.updated += 1;
        }
        Decision::Unchanged => {}
        Decision::Skip => {
            plan.stats.skipped += 1;
            if local_ws.is_none() {
                // Workspace is being deleted locally; nothing below it can land
                debug!("Skipping pull of workspace {} (pending local delete)", remote_ws.id);
                plan.stats.skipped += remote.notes.len() + remote.blocks.len();
                return plan;
            }
        }
    }

    let local_notes: HashMap<Uuid, &Note> = local.notes.iter().map(|n| (n.id, n)).collect();
    let local_blocks: HashMap<Uuid, &Block> = local.blocks.iter().map(|b| (b.id, b)).collect();

    // Final parent of every note that will exist after the merge
    let mut parent_of: HashMap<Uuid, Option<Uuid>> =
        local.notes.iter().map(|n| (n.id, n.parent_id)).collect();
    let mut unavailable: HashSet<Uuid> = HashSet::new();

    for note in parent_first(&remote.notes) {
        if note.workspace_id != remote_ws.id {
            unavailable.insert(note.id);
            plan.stats.skipped += 1;
            continue;
        }
        let local_row = local_notes.get(&note.id).map(|n| LocalRow {
            status: n.sync_status,
            updated_at: n.updated_at,
        });

        let parent_missing = note
            .parent_id
            .is_some_and(|p| unavailable.contains(&p) || !parent_of.contains_key(&p));

        match decide(local_row, note.updated_at, pending.contains(&note.id)) {
            Decision::Insert if parent_missing => {
                unavailable.insert(note.id);
                plan.stats.skipped += 1;
            }
            Decision::Insert => {
                parent_of.insert(note.id, note.parent_id);
                plan.notes.push(note.clone());
                plan.stats.inserted += 1;
            }
            Decision::Overwrite => {
                if parent_missing || would_cycle(&parent_of, note.id, note.parent_id) {
                    warn!("Not applying remote move of note {}: parent unavailable locally", note.id);
                    plan.stats.skipped += 1;
                    continue;
                }
                parent_of.insert(note.id, note.parent_id);
                plan.notes.push(note.clone());
                plan.stats.updated += 1;
            }
            Decision::Unchanged => {}
            Decision::Skip => {
                if local_row.is_none() {
                    unavailable.insert(note.id);
                }
                plan.stats.skipped += 1;
            }
        }
    }

    if include_blocks {
        for block in &remote.blocks {
            if unavailable.contains(&block.note_id) || !parent_of.contains_key(&block.note_id) {
                plan.stats.skipped += 1;
                continue;
            }
            let local_row = local_blocks.get(&block.id).map(|b| LocalRow {
                status: b.sync_status,
                updated_at: b.updated_at,
            });
            match decide(local_row, block.updated_at, pending.contains(&block.id)) {
                Decision::Insert => {
                    plan.blocks.push(block.clone());
                    plan.stats.inserted += 1;
                }
                Decision::Overwrite => {
                    plan.blocks.push(block.clone());
                    plan.stats.updated += 1;
                }
                Decision::Unchanged => {}
                Decision::Skip => plan.stats.skipped += 1,
            }
        }
    }

    plan_deletions(local, remote, pending, include_blocks, &parent_of, &mut plan);
    plan
}

/// Local rows the server no longer has
fn plan_deletions(
    local: &WorkspaceTree,
    remote: &WorkspaceTree,
    pending: &HashSet<Uuid>,
    include_blocks: bool,
    parent_of: &HashMap<Uuid, Option<Uuid>>,
    plan: &mut MergePlan,
) {
    let remote_notes: HashSet<Uuid> = remote.notes.iter().map(|n| n.id).collect();
    let remote_blocks: HashSet<Uuid> = remote.blocks.iter().map(|b| b.id).collect();

    // Notes that must survive: still on the server, or holding local work.
    // Their ancestors survive too, since deleting a note cascades.
    let mut anchors: Vec<Uuid> = Vec::new();
    for note in &local.notes {
        if remote_notes.contains(&note.id)
            || note.sync_status.is_protected()
            || pending.contains(&note.id)
        {
            anchors.push(note.id);
        }
    }
    for block in &local.blocks {
        let keep_block = block.sync_status.is_protected()
            || pending.contains(&block.id)
            || !include_blocks
            || remote_blocks.contains(&block.id);
        if keep_block {
            anchors.push(block.note_id);
        }
    }
    for note in &plan.notes {
        anchors.push(note.id);
    }

    let mut keep: HashSet<Uuid> = HashSet::new();
    for anchor in anchors {
        let mut current = Some(anchor);
        while let Some(id) = current {
            if !keep.insert(id) {
                break;
            }
            current = parent_of.get(&id).copied().flatten();
        }
    }

    let mut deleted_notes: HashSet<Uuid> = HashSet::new();
    for note in &local.notes {
        if keep.contains(&note.id) {
            continue;
        }
        if remote_notes.contains(&note.id) {
            continue;
        }
        deleted_notes.insert(note.id);
        plan.delete_notes.push(note.id);
        plan.stats.deleted += 1;
    }

    if !include_blocks {
        return;
    }
    for block in &local.blocks {
        if remote_blocks.contains(&block.id) {
            continue;
        }
        if block.sync_status.is_protected() || pending.contains(&block.id) {
            plan.stats.skipped += 1;
            continue;
        }
        plan.stats.deleted += 1;
        // Removed by the note cascade otherwise
        if !deleted_notes.contains(&block.note_id) {
            plan.delete_blocks.push(block.id);
        }
    }
}

/// Remote workspace is gone: drop the local copy unless it holds local work
fn plan_workspace_removal(local: &WorkspaceTree, pending: &HashSet<Uuid>, plan: &mut MergePlan) {
    let Some(ws) = local.workspace.as_ref() else {
        return;
    };

    let protected = ws.sync_status.is_protected()
        || pending.contains(&ws.id)
        || local
            .notes
            .iter()
            .any(|n| n.sync_status.is_protected() || pending.contains(&n.id))
        || local
            .blocks
            .iter()
            .any(|b| b.sync_status.is_protected() || pending.contains(&b.id));

    if protected {
        debug!("Keeping workspace {} deleted remotely: it has unsynced work", ws.id);
        plan.stats.skipped += 1;
        return;
    }

    plan.delete_workspace = true;
    plan.stats.deleted += 1 + local.notes.len() + local.blocks.len();
}

/// Would giving `note` the parent `parent` make it its own ancestor?
fn would_cycle(parent_of: &HashMap<Uuid, Option<Uuid>>, note: Uuid, parent: Option<Uuid>) -> bool {
    let mut current = parent;
    let mut steps = 0;
    while let Some(id) = current {
        if id == note || steps > parent_of.len() {
            return true;
        }
        current = parent_of.get(&id).copied().flatten();
        steps += 1;
    }
    false
}

/// Order notes so that every note comes after its parent (breadth first).
///
/// Notes whose parent is not in the slice are treated as roots. Notes caught
/// in a cycle are never reached and are dropped.
fn parent_first(notes: &[Note]) -> Vec<&Note> {
    let ids: HashSet<Uuid> = notes.iter().map(|n| n.id).collect();
    let mut children: HashMap<Uuid, Vec<&Note>> = HashMap::new();
    let mut queue: VecDeque<&Note> = VecDeque::new();

    for note in notes {
        match note.parent_id {
            Some(p) if p != note.id && ids.contains(&p) => {
                children.entry(p).or_default().push(note)
            }
            _ => queue.push_back(note),
        }
    }

    let mut ordered = Vec::with_capacity(notes.len());
    while let Some(note) = queue.pop_front() {
        ordered.push(note);
        if let Some(kids) = children.remove(&note.id) {
            queue.extend(kids);
        }
    }

    if ordered.len() < notes.len() {
        warn!(
            "Ignoring {} remote note(s) caught in a parent cycle",
            notes.len() - ordered.len()
        );
    }
    ordered
}
