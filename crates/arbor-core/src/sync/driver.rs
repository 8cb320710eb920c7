//! Sync driver
//!
//! One sync run walks three phases in a fixed order:
//!
//! 1. **Push**: drain the change log into one batch and apply the per-entity
//!    results (success or conflict) back to the store
//! 2. **Status**: send every local workspace hash, receive mismatches
//! 3. **Pull**: fetch each mismatched workspace and merge it
//!
//! A failed push does not stop status and pull; a failed status stops the
//! pull; a failed pull of one workspace does not stop the others. An
//! authentication failure anywhere ends the run and invalidates the session.
//!
//! The store is locked only around local reads and writes, never while a
//! request is in flight.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{Auth, RunContext};
use super::error::{SyncError, SyncResult};
use super::merge::MergeStats;
use super::state::SyncState;
use super::transport::SyncTransport;
use crate::models::{self, ChangeAction, ChangeLogEntry, EntityKind};
use crate::protocol::{
    ChangeItem, EntityData, HealthResponse, PullRequest, PushConflict, PushRequest, StatusRequest,
};
use crate::storage::WorkspaceTree;
use crate::store::Store;

/// Phase of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Checks before any request (credential present)
    Session,
    Push,
    Status,
    Pull,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Session => "session",
            SyncPhase::Push => "push",
            SyncPhase::Status => "status",
            SyncPhase::Pull => "pull",
        };
        f.write_str(name)
    }
}

/// A failure recorded during a run
#[derive(Debug, Clone, Serialize)]
pub struct PhaseError {
    pub phase: SyncPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
    pub message: String,
    pub retryable: bool,
    pub unauthorized: bool,
}

/// Outcome of one sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    /// Entities the server accepted
    pub pushed: usize,
    /// Entities settled locally without a request (created and deleted
    /// before they were ever pushed)
    pub discarded: usize,
    pub conflicts: Vec<PushConflict>,
    /// Workspaces the status phase reported as different
    pub mismatched: usize,
    /// Workspaces pulled and merged
    pub pulled: usize,
    pub merge: MergeStats,
    pub errors: Vec<PhaseError>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            pushed: 0,
            discarded: 0,
            conflicts: Vec::new(),
            mismatched: 0,
            pulled: 0,
            merge: MergeStats::default(),
            errors: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    fn record(&mut self, phase: SyncPhase, workspace_id: Option<Uuid>, err: &SyncError) {
        warn!("Sync {} failed: {}", phase, err);
        self.errors.push(PhaseError {
            phase,
            workspace_id,
            message: err.to_string(),
            retryable: err.is_retryable(),
            unauthorized: err.is_auth(),
        });
    }

    /// Whether the run ended because the credential was rejected
    pub fn unauthorized(&self) -> bool {
        self.errors.iter().any(|e| e.unauthorized)
    }

    /// One-line summary for logs and CLI output
    pub fn summary(&self) -> String {
        format!(
            "pushed {}, conflicts {}, pulled {} workspace(s) (+{} ~{} -{}), errors {}",
            self.pushed,
            self.conflicts.len(),
            self.pulled,
            self.merge.inserted,
            self.merge.updated,
            self.merge.deleted,
            self.errors.len()
        )
    }
}

/// Pending entries of one entity folded into a single wire item
#[derive(Debug)]
struct PendingGroup {
    kind: EntityKind,
    id: Uuid,
    entry_ids: Vec<i64>,
    first_action: ChangeAction,
    last_action: ChangeAction,
    /// Newest non-delete snapshot
    snapshot: Option<String>,
}

impl PendingGroup {
    /// Net action to send, `None` if the entity never needs to reach the server
    fn net_action(&self) -> Option<ChangeAction> {
        match (self.first_action, self.last_action) {
            (ChangeAction::Create, ChangeAction::Delete) => None,
            (_, ChangeAction::Delete) => Some(ChangeAction::Delete),
            (ChangeAction::Create, _) => Some(ChangeAction::Create),
            _ => Some(ChangeAction::Update),
        }
    }
}

/// Group pending entries per entity, keeping first-seen order
fn group_pending(entries: Vec<ChangeLogEntry>) -> Vec<PendingGroup> {
    let mut groups: Vec<PendingGroup> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for entry in entries {
        let snapshot = (entry.action != ChangeAction::Delete).then_some(entry.payload);
        match index.get(&entry.entity_id) {
            Some(&i) => {
                let group = &mut groups[i];
                group.entry_ids.push(entry.id);
                group.last_action = entry.action;
                if snapshot.is_some() {
                    group.snapshot = snapshot;
                }
            }
            None => {
                index.insert(entry.entity_id, groups.len());
                groups.push(PendingGroup {
                    kind: entry.entity_type,
                    id: entry.entity_id,
                    entry_ids: vec![entry.id],
                    first_action: entry.action,
                    last_action: entry.action,
                    snapshot,
                });
            }
        }
    }
    groups
}

/// Order a batch so the server can apply it front to back: workspaces,
/// then notes parent-first, then blocks, then deletes (blocks first).
fn order_for_push(items: Vec<(ChangeItem, Vec<i64>)>) -> Vec<(ChangeItem, Vec<i64>)> {
    let rank = |kind: EntityKind| match kind {
        EntityKind::Workspace => 0,
        EntityKind::Note => 1,
        EntityKind::Block => 2,
    };

    let (mut deletes, mut writes): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|(item, _)| item.action == ChangeAction::Delete);

    // Parent-first among notes written in this batch
    let note_parent: HashMap<Uuid, Option<Uuid>> = writes
        .iter()
        .filter(|(item, _)| item.entity_type == EntityKind::Note)
        .map(|(item, _)| {
            let parent = item
                .data
                .get("parent_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok());
            (item.entity_id, parent)
        })
        .collect();
    let mut depth_cache: HashMap<Uuid, usize> = HashMap::new();
    for id in note_parent.keys() {
        let mut chain = Vec::new();
        let mut current = Some(*id);
        let mut seen = HashSet::new();
        let mut base = 0;
        while let Some(n) = current {
            if let Some(d) = depth_cache.get(&n) {
                base = *d + 1;
                break;
            }
            if !seen.insert(n) {
                break;
            }
            chain.push(n);
            current = note_parent.get(&n).copied().flatten().filter(|p| note_parent.contains_key(p));
        }
        for (offset, n) in chain.iter().rev().enumerate() {
            depth_cache.insert(*n, base + offset);
        }
    }
    writes.sort_by_key(|(item, _)| {
        let depth = if item.entity_type == EntityKind::Note {
            depth_cache.get(&item.entity_id).copied().unwrap_or(0)
        } else {
            0
        };
        (rank(item.entity_type), depth)
    });

    deletes.sort_by_key(|(item, _)| std::cmp::Reverse(rank(item.entity_type)));

    writes.into_iter().chain(deletes).collect()
}

/// Client side of the sync protocol
pub struct SyncDriver<T, A> {
    store: Arc<Mutex<Store>>,
    transport: T,
    auth: A,
    state: SyncState,
}

impl<T: SyncTransport, A: Auth> SyncDriver<T, A> {
    pub fn new(store: Arc<Mutex<Store>>, transport: T, auth: A) -> Self {
        Self {
            store,
            transport,
            auth,
            state: SyncState::new(),
        }
    }

    /// Use (and keep saving) a persisted sync state
    pub fn with_state(mut self, state: SyncState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    /// Probe the server without credentials
    pub async fn heartbeat(&self) -> SyncResult<HealthResponse> {
        self.transport.heartbeat().await
    }

    /// Run push, status and pull once
    pub async fn sync(&mut self) -> SyncReport {
        let started_at = models::now();
        let mut report = SyncReport::new(started_at);

        match self.run_context(started_at) {
            Ok(ctx) => self.run_phases(&ctx, &mut report).await,
            Err(e) => report.record(SyncPhase::Session, None, &e),
        }

        report.success = report.errors.is_empty();
        report.finished_at = models::now();

        let error = report.errors.first().map(|e| format!("{}: {}", e.phase, e.message));
        self.state.record_run(started_at, error);
        if let Err(e) = self.state.save() {
            warn!("Failed to save sync state: {:#}", e);
        }

        info!("Sync finished: {}", report.summary());
        report
    }

    fn run_context(&self, started_at: DateTime<Utc>) -> SyncResult<RunContext> {
        let credential = self
            .auth
            .credential()
            .ok_or_else(|| SyncError::Unauthorized("no credential available".to_string()))?;
        let user_id = self
            .auth
            .user_id()
            .ok_or_else(|| SyncError::Unauthorized("no user id available".to_string()))?;
        Ok(RunContext {
            credential,
            user_id,
            sync_token: self.state.sync_token.clone(),
            started_at,
        })
    }

    async fn run_phases(&mut self, ctx: &RunContext, report: &mut SyncReport) {
        debug!("Sync run for user {} started", ctx.user_id);

        if let Err(e) = self.push_phase(ctx, report).await {
            report.record(SyncPhase::Push, None, &e);
            if self.check_auth(&e) {
                return;
            }
        }

        let mismatches = match self.status_phase(ctx, report).await {
            Ok(mismatches) => mismatches,
            Err(e) => {
                report.record(SyncPhase::Status, None, &e);
                self.check_auth(&e);
                return;
            }
        };

        for (workspace_id, include_blocks) in mismatches {
            match self.pull_workspace(ctx, workspace_id, include_blocks).await {
                Ok(stats) => {
                    report.pulled += 1;
                    report.merge += stats;
                }
                Err(e) => {
                    report.record(SyncPhase::Pull, Some(workspace_id), &e);
                    if self.check_auth(&e) {
                        return;
                    }
                }
            }
        }
    }

    /// Invalidate the session on auth failures; returns true if the run must stop
    fn check_auth(&self, err: &SyncError) -> bool {
        if err.is_auth() {
            self.auth.invalidate();
            true
        } else {
            false
        }
    }

    async fn push_phase(&mut self, ctx: &RunContext, report: &mut SyncReport) -> SyncResult<()> {
        let (items, keys) = {
            let mut store = self.store.lock().await;
            let groups = group_pending(store.list_pending()?);
            let mut items = Vec::new();

            for group in groups {
                let Some(action) = group.net_action() else {
                    store.confirm_push(&group.entry_ids, group.kind, group.id, None)?;
                    report.discarded += 1;
                    continue;
                };

                let item = match action {
                    ChangeAction::Delete => ChangeItem::delete(group.kind, group.id),
                    _ => {
                        let data = group
                            .snapshot
                            .as_deref()
                            .ok_or_else(|| "missing snapshot".to_string())
                            .and_then(|s| {
                                EntityData::from_snapshot(group.kind, s).map_err(|e| e.to_string())
                            });
                        let data = match data {
                            Ok(data) => data,
                            Err(e) => {
                                warn!("Dropping unreadable change for {} {}: {}", group.kind, group.id, e);
                                let message = format!("corrupt payload: {}", e);
                                for entry in &group.entry_ids {
                                    store.change_log().mark_error(*entry, &message)?;
                                }
                                continue;
                            }
                        };
                        let baseline = match action {
                            ChangeAction::Create => None,
                            _ => store.base_updated_at(group.kind, group.id)?,
                        };
                        ChangeItem::write(action, group.id, &data, baseline)
                    }
                };
                items.push((item, group.entry_ids));
            }

            let items = order_for_push(items);
            let keys: HashMap<(EntityKind, Uuid), Vec<i64>> = items
                .iter()
                .map(|(item, ids)| ((item.entity_type, item.entity_id), ids.clone()))
                .collect();
            (items, keys)
        };

        if items.is_empty() {
            debug!("Nothing to push");
            return Ok(());
        }

        let request = PushRequest {
            changes: items.into_iter().map(|(item, _)| item).collect(),
            sync_token: ctx.sync_token.clone(),
        };
        debug!("Pushing {} change(s)", request.changes.len());
        let response = self.transport.push(&ctx.credential, &request).await?;

        let mut store = self.store.lock().await;
        let mut answered: HashSet<(EntityKind, Uuid)> = HashSet::new();

        for update in &response.updates {
            let key = (update.entity_type, update.entity_id);
            let Some(entry_ids) = keys.get(&key) else {
                warn!("Server confirmed {} {} which was not pushed", key.0, key.1);
                continue;
            };
            store.confirm_push(entry_ids, key.0, key.1, update.updated_at)?;
            answered.insert(key);
            report.pushed += 1;
        }

        for conflict in &response.conflicts {
            let key = (conflict.entity_type, conflict.entity_id);
            let Some(entry_ids) = keys.get(&key) else {
                warn!("Server reported a conflict for {} {} which was not pushed", key.0, key.1);
                continue;
            };
            let message = format!("{}: {}", conflict.reason.as_str(), conflict.message);
            store.reject_push(entry_ids, key.0, key.1, &message, conflict.server_updated_at)?;
            answered.insert(key);
            info!("Conflict on {} {}: {}", key.0, key.1, message);
            report.conflicts.push(conflict.clone());
        }

        let unanswered = keys.len() - answered.len();
        if unanswered > 0 {
            warn!("{} pushed change(s) got no answer; they stay pending", unanswered);
        }

        self.state.sync_token = Some(response.sync_token);
        Ok(())
    }

    /// Workspaces to pull, with whether blocks are needed
    async fn status_phase(
        &mut self,
        ctx: &RunContext,
        report: &mut SyncReport,
    ) -> SyncResult<Vec<(Uuid, bool)>> {
        let hashes = {
            let store = self.store.lock().await;
            store.workspace_hashes()?
        };
        let request = StatusRequest {
            workspace_hashes: hashes,
        };
        let response = self.transport.status(&ctx.credential, &request).await?;

        report.mismatched = response.mismatches.len();
        self.state.sync_token = Some(response.sync_token);
        debug!("{} workspace(s) differ from the server", response.mismatches.len());

        let mut seen = HashSet::new();
        Ok(response
            .mismatches
            .into_iter()
            .filter(|m| seen.insert(m.workspace_id))
            .map(|m| {
                let blocks = m.required_entities.is_empty()
                    || m.required_entities.contains(&EntityKind::Block);
                (m.workspace_id, blocks)
            })
            .collect())
    }

    async fn pull_workspace(
        &mut self,
        ctx: &RunContext,
        workspace_id: Uuid,
        include_blocks: bool,
    ) -> SyncResult<MergeStats> {
        let request = PullRequest {
            workspace_id,
            include_blocks,
        };
        let response = self.transport.pull(&ctx.credential, &request).await?;

        if let Some(ws) = &response.workspace {
            if ws.id != workspace_id {
                return Err(SyncError::Protocol(format!(
                    "asked for workspace {} but received {}",
                    workspace_id, ws.id
                )));
            }
        }

        let remote = WorkspaceTree {
            workspace: response.workspace,
            notes: response.notes,
            blocks: response.blocks,
        };

        let mut store = self.store.lock().await;
        let stats = store.apply_pull(workspace_id, &remote, include_blocks)?;
        let local_hash = store.compute_workspace_hash(workspace_id)?;
        if local_hash != response.hash && stats.skipped == 0 {
            warn!(
                "Workspace {} still differs from the server after merge",
                workspace_id
            );
        }
        debug!(
            "Merged workspace {}: +{} ~{} -{} (skipped {})",
            workspace_id, stats.inserted, stats.updated, stats.deleted, stats.skipped
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Block, Note, SyncStatus, Workspace};
    use crate::protocol::ConflictReason;
    use crate::sync::auth::TokenAuth;
    use crate::sync::mock::{Failure, MockTransport};

    fn auth() -> TokenAuth {
        TokenAuth::new(Some("token".into()), Some("alice".into()))
    }

    fn shared(store: Store) -> Arc<Mutex<Store>> {
        Arc::new(Mutex::new(store))
    }

    fn entry(id: i64, kind: EntityKind, entity: Uuid, action: ChangeAction) -> ChangeLogEntry {
        ChangeLogEntry {
            id,
            entity_type: kind,
            entity_id: entity,
            action,
            status: crate::models::ChangeStatus::Pending,
            payload: format!("{{\"n\":{}}}", id),
            created_at: models::now(),
            synced_at: None,
            error: None,
        }
    }

    #[test]
    fn test_grouping_nets_actions() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let groups = group_pending(vec![
            entry(1, EntityKind::Note, a, ChangeAction::Create),
            entry(2, EntityKind::Note, b, ChangeAction::Update),
            entry(3, EntityKind::Note, a, ChangeAction::Update),
            entry(4, EntityKind::Note, c, ChangeAction::Create),
            entry(5, EntityKind::Note, b, ChangeAction::Delete),
            entry(6, EntityKind::Note, c, ChangeAction::Delete),
        ]);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].net_action(), Some(ChangeAction::Create));
        assert_eq!(groups[0].entry_ids, vec![1, 3]);
        assert_eq!(groups[0].snapshot.as_deref(), Some("{\"n\":3}"));
        assert_eq!(groups[1].net_action(), Some(ChangeAction::Delete));
        assert_eq!(groups[2].net_action(), None);
    }

    #[test]
    fn test_push_order_is_parent_first() {
        let ws = Uuid::new_v4();
        let parent = Note::new(ws, None, "Parent");
        let mut child = Note::new(ws, None, "Child");
        child.parent_id = Some(parent.id);
        let block = Block::new(child.id, "text", "x", 0);
        let gone = Uuid::new_v4();

        let items = vec![
            (ChangeItem::write(ChangeAction::Create, block.id, &EntityData::from(&block), None), vec![1]),
            (ChangeItem::delete(EntityKind::Note, gone), vec![2]),
            (ChangeItem::write(ChangeAction::Create, child.id, &EntityData::from(&child), None), vec![3]),
            (ChangeItem::write(ChangeAction::Create, parent.id, &EntityData::from(&parent), None), vec![4]),
        ];
        let ordered: Vec<Uuid> = order_for_push(items).into_iter().map(|(i, _)| i.entity_id).collect();
        assert_eq!(ordered, vec![parent.id, child.id, block.id, gone]);
    }

    #[tokio::test]
    async fn test_push_marks_rows_synced() {
        let mut store = Store::open_in_memory().unwrap();
        let ws = Workspace::new("alice", "Home");
        store.create_workspace(&ws).unwrap();
        let store = shared(store);

        let transport = MockTransport::new();
        let mut driver = SyncDriver::new(store.clone(), transport.clone(), auth());
        let report = driver.sync().await;

        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.pushed, 1);
        let store = store.lock().await;
        let row = store.get_workspace(ws.id).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert!(store.list_pending().unwrap().is_empty());
        assert_eq!(transport.pushed_items().len(), 1);
        assert_eq!(driver.state().sync_token.as_deref(), Some("mock-token"));
    }

    #[tokio::test]
    async fn test_create_then_delete_sends_nothing() {
        let mut store = Store::open_in_memory().unwrap();
        let ws = Workspace::new("alice", "Scratch");
        store.create_workspace(&ws).unwrap();
        store.delete_workspace(ws.id).unwrap();
        let store = shared(store);

        let transport = MockTransport::new();
        let mut driver = SyncDriver::new(store.clone(), transport.clone(), auth());
        let report = driver.sync().await;

        assert!(report.success);
        assert_eq!(report.discarded, 1);
        assert_eq!(transport.push_calls(), 0);
        assert!(store.lock().await.list_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_is_reported_and_flagged() {
        let mut store = Store::open_in_memory().unwrap();
        let ws = Workspace::new("alice", "Contested");
        store.create_workspace(&ws).unwrap();
        let store = shared(store);

        let transport = MockTransport::new();
        transport.conflict_on(ws.id, ConflictReason::AlreadyExists);
        let mut driver = SyncDriver::new(store.clone(), transport, auth());
        let report = driver.sync().await;

        assert!(report.success);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].reason, ConflictReason::AlreadyExists);
        let store = store.lock().await;
        assert_eq!(
            store.get_workspace(ws.id).unwrap().unwrap().sync_status,
            SyncStatus::Conflict
        );
        assert_eq!(store.change_log().counts().unwrap().error, 1);
    }

    #[tokio::test]
    async fn test_push_failure_does_not_block_pull() {
        let store = shared(Store::open_in_memory().unwrap());
        {
            let mut s = store.lock().await;
            s.create_workspace(&Workspace::new("alice", "Local")).unwrap();
        }

        let remote_ws = Workspace::new("alice", "Remote");
        let transport = MockTransport::new();
        transport.fail_push(Failure::Server);
        transport.serve_workspace(WorkspaceTree {
            workspace: Some(remote_ws.clone()),
            notes: vec![Note::new(remote_ws.id, None, "From server")],
            blocks: vec![],
        });

        let mut driver = SyncDriver::new(store.clone(), transport.clone(), auth());
        let report = driver.sync().await;

        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].phase, SyncPhase::Push);
        assert!(report.errors[0].retryable);
        assert_eq!(report.pulled, 1);
        assert_eq!(report.merge.inserted, 2);

        let store = store.lock().await;
        assert!(store.get_workspace(remote_ws.id).unwrap().is_some());
        // The failed push stays pending for the next run
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_aborts_run() {
        let store = shared(Store::open_in_memory().unwrap());
        {
            let mut s = store.lock().await;
            s.create_workspace(&Workspace::new("alice", "Local")).unwrap();
        }
        let transport = MockTransport::new();
        transport.fail_push(Failure::Unauthorized);

        let auth = Arc::new(auth());
        let mut driver = SyncDriver::new(store, transport.clone(), auth.clone());
        let report = driver.sync().await;

        assert!(report.unauthorized());
        assert_eq!(transport.status_calls(), 0);
        assert!(!auth.is_authenticated());

        // Without a credential the next run fails before any request
        let report = driver.sync().await;
        assert_eq!(report.errors[0].phase, SyncPhase::Session);
        assert_eq!(transport.push_calls(), 1);
    }

    #[tokio::test]
    async fn test_status_failure_skips_pull() {
        let store = shared(Store::open_in_memory().unwrap());
        let transport = MockTransport::new();
        transport.fail_status(Failure::Server);
        let ws = Workspace::new("alice", "Remote");
        transport.serve_workspace(WorkspaceTree {
            workspace: Some(ws),
            ..WorkspaceTree::default()
        });

        let mut driver = SyncDriver::new(store, transport.clone(), auth());
        let report = driver.sync().await;

        assert!(!report.success);
        assert_eq!(report.errors[0].phase, SyncPhase::Status);
        assert_eq!(transport.pull_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_pull_does_not_stop_other_workspaces() {
        let store = shared(Store::open_in_memory().unwrap());
        let transport = MockTransport::new();
        let broken = Workspace::new("alice", "Broken");
        let fine = Workspace::new("alice", "Fine");
        transport.serve_workspace(WorkspaceTree {
            workspace: Some(broken.clone()),
            ..WorkspaceTree::default()
        });
        transport.serve_workspace(WorkspaceTree {
            workspace: Some(fine.clone()),
            ..WorkspaceTree::default()
        });
        transport.fail_pull_of(broken.id);

        let mut driver = SyncDriver::new(store.clone(), transport, auth());
        let report = driver.sync().await;

        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].workspace_id, Some(broken.id));
        assert_eq!(report.pulled, 1);
        assert!(store.lock().await.get_workspace(fine.id).unwrap().is_some());
    }
}
