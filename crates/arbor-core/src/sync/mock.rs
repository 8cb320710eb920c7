//! In-memory transport for driver and scheduler tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use super::error::{SyncError, SyncResult};
use super::transport::SyncTransport;
use crate::models::{self, ChangeAction};
use crate::protocol::{
    ChangeItem, ConflictReason, HealthResponse, Mismatch, PullRequest, PullResponse,
    PushConflict, PushRequest, PushResponse, PushUpdate, StatusRequest, StatusResponse,
};
use crate::storage::WorkspaceTree;

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Unauthorized,
    Server,
    Offline,
}

impl Failure {
    fn to_error(self) -> SyncError {
        match self {
            Failure::Unauthorized => SyncError::Unauthorized("token expired".into()),
            Failure::Server => SyncError::Server {
                status: 503,
                message: "unavailable".into(),
            },
            Failure::Offline => SyncError::transport_retryable("connection refused"),
        }
    }
}

#[derive(Default)]
struct MockState {
    workspaces: HashMap<Uuid, WorkspaceTree>,
    conflicts: HashMap<Uuid, ConflictReason>,
    broken_pulls: HashSet<Uuid>,
    heartbeat_failure: Option<Failure>,
    push_failure: Option<Failure>,
    status_failure: Option<Failure>,
    pushed: Vec<ChangeItem>,
    heartbeat_calls: usize,
    push_calls: usize,
    status_calls: usize,
    pull_calls: usize,
    delay: Duration,
}

/// Scriptable fake server; clones share state
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn serve_workspace(&self, tree: WorkspaceTree) {
        let Some(id) = tree.workspace.as_ref().map(|w| w.id) else {
            panic!("served trees need a workspace");
        };
        self.with_state(|s| s.workspaces.insert(id, tree));
    }

    pub fn conflict_on(&self, entity_id: Uuid, reason: ConflictReason) {
        self.with_state(|s| s.conflicts.insert(entity_id, reason));
    }

    pub fn fail_heartbeat(&self, failure: Option<Failure>) {
        self.with_state(|s| s.heartbeat_failure = failure);
    }

    pub fn fail_push(&self, failure: Failure) {
        self.with_state(|s| s.push_failure = Some(failure));
    }

    pub fn fail_status(&self, failure: Failure) {
        self.with_state(|s| s.status_failure = Some(failure));
    }

    pub fn fail_pull_of(&self, workspace_id: Uuid) {
        self.with_state(|s| s.broken_pulls.insert(workspace_id));
    }

    /// Make every call take this long
    pub fn set_delay(&self, delay: Duration) {
        self.with_state(|s| s.delay = delay);
    }

    pub fn pushed_items(&self) -> Vec<ChangeItem> {
        self.with_state(|s| s.pushed.clone())
    }

    pub fn heartbeat_calls(&self) -> usize {
        self.with_state(|s| s.heartbeat_calls)
    }

    pub fn push_calls(&self) -> usize {
        self.with_state(|s| s.push_calls)
    }

    pub fn status_calls(&self) -> usize {
        self.with_state(|s| s.status_calls)
    }

    pub fn pull_calls(&self) -> usize {
        self.with_state(|s| s.pull_calls)
    }

    async fn wait(&self) {
        let delay = self.with_state(|s| s.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl SyncTransport for MockTransport {
    async fn heartbeat(&self) -> SyncResult<HealthResponse> {
        let failure = self.with_state(|s| {
            s.heartbeat_calls += 1;
            s.heartbeat_failure
        });
        if let Some(f) = failure {
            return Err(f.to_error());
        }
        Ok(HealthResponse {
            status: "ok".into(),
            server_time: models::now(),
        })
    }

    async fn status(&self, _credential: &str, request: &StatusRequest) -> SyncResult<StatusResponse> {
        self.wait().await;
        self.with_state(|s| {
            s.status_calls += 1;
            if let Some(f) = s.status_failure {
                return Err(f.to_error());
            }
            let mut mismatches: Vec<Mismatch> = s
                .workspaces
                .iter()
                .filter(|(id, tree)| request.workspace_hashes.get(*id) != Some(&tree.hash()))
                .map(|(id, _)| Mismatch::full(*id))
                .collect();
            mismatches.sort_by_key(|m| m.workspace_id);
            Ok(StatusResponse {
                mismatches,
                sync_token: "mock-token".into(),
            })
        })
    }

    async fn pull(&self, _credential: &str, request: &PullRequest) -> SyncResult<PullResponse> {
        self.wait().await;
        self.with_state(|s| {
            s.pull_calls += 1;
            if s.broken_pulls.contains(&request.workspace_id) {
                return Err(SyncError::Protocol("truncated body".into()));
            }
            let tree = s
                .workspaces
                .get(&request.workspace_id)
                .cloned()
                .unwrap_or_default();
            let hash = tree.hash();
            Ok(PullResponse {
                workspace: tree.workspace,
                notes: tree.notes,
                blocks: if request.include_blocks { tree.blocks } else { Vec::new() },
                hash,
            })
        })
    }

    async fn push(&self, _credential: &str, request: &PushRequest) -> SyncResult<PushResponse> {
        self.wait().await;
        self.with_state(|s| {
            s.push_calls += 1;
            if let Some(f) = s.push_failure {
                return Err(f.to_error());
            }
            let now = models::now();
            let mut response = PushResponse {
                sync_token: "mock-token".into(),
                ..PushResponse::default()
            };
            for item in &request.changes {
                s.pushed.push(item.clone());
                match s.conflicts.get(&item.entity_id) {
                    Some(reason) => response.conflicts.push(PushConflict {
                        entity_type: item.entity_type,
                        entity_id: item.entity_id,
                        action: item.action,
                        reason: *reason,
                        message: "rejected by mock".into(),
                        server_updated_at: Some(now),
                    }),
                    None => response.updates.push(PushUpdate {
                        entity_type: item.entity_type,
                        entity_id: item.entity_id,
                        action: item.action,
                        updated_at: (item.action != ChangeAction::Delete).then_some(now),
                    }),
                }
            }
            Ok(response)
        })
    }
}
