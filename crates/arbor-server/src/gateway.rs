//! Sync gateway
//!
//! Protocol logic independent of HTTP: authenticate the bearer token, then
//! answer status, pull and push against the server database. The axum
//! handlers are thin wrappers around these methods, and tests can drive
//! them directly.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use arbor_core::hash::EMPTY_HASH;
use arbor_core::models;
use arbor_core::protocol::{
    HealthResponse, Mismatch, PullRequest, PullResponse, PushRequest, PushResponse,
    StatusRequest, StatusResponse,
};

use crate::config::ServerConfig;
use crate::db::ServerDb;
use crate::error::{ApiError, ApiResult};

/// Largest push batch accepted in one request
pub const MAX_BATCH: usize = 5_000;

pub struct Gateway {
    db: Mutex<ServerDb>,
    tokens: HashMap<String, String>,
    cache_ttl: Duration,
}

impl Gateway {
    pub fn new(db: ServerDb, tokens: HashMap<String, String>, cache_ttl: Duration) -> Self {
        Self {
            db: Mutex::new(db),
            tokens,
            cache_ttl,
        }
    }

    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let db = ServerDb::open(&config.database)
            .with_context(|| format!("Failed to open database {:?}", config.database))?;
        if config.tokens.is_empty() {
            tracing::warn!("No tokens configured; every sync request will be rejected");
        }
        Ok(Self::new(db, config.tokens.clone(), config.cache_ttl()))
    }

    fn db(&self) -> ApiResult<MutexGuard<'_, ServerDb>> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".to_string()))
    }

    /// Map a bearer token to its user id
    pub fn authenticate(&self, credential: Option<&str>) -> ApiResult<&str> {
        let token = credential
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
        self.tokens
            .get(token)
            .map(String::as_str)
            .ok_or_else(|| ApiError::Unauthorized("unknown token".to_string()))
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            server_time: models::now(),
        }
    }

    fn sync_token() -> String {
        models::now().timestamp_millis().to_string()
    }

    /// Compare client hashes with the server's; also report workspaces the
    /// client did not mention. A cold or expired cache entry counts as a
    /// mismatch.
    pub fn status(
        &self,
        credential: Option<&str>,
        request: &StatusRequest,
    ) -> ApiResult<StatusResponse> {
        let user = self.authenticate(credential)?;
        let db = self.db()?;

        let mut mismatched = BTreeSet::new();
        for (workspace_id, client_hash) in &request.workspace_hashes {
            let server_hash = match db.workspace_owner(*workspace_id)? {
                Some(owner) if owner == user => db.cached_hash(*workspace_id, self.cache_ttl)?,
                // Absent or someone else's: the client must drop its copy
                _ => Some(EMPTY_HASH.to_string()),
            };
            if server_hash.as_ref() != Some(client_hash) {
                mismatched.insert(*workspace_id);
            }
        }
        for workspace_id in db.owned_workspaces(user)? {
            if !request.workspace_hashes.contains_key(&workspace_id) {
                mismatched.insert(workspace_id);
            }
        }

        debug!(
            "Status for {}: {} submitted, {} mismatched",
            user,
            request.workspace_hashes.len(),
            mismatched.len()
        );
        Ok(StatusResponse {
            mismatches: mismatched.into_iter().map(Mismatch::full).collect(),
            sync_token: Self::sync_token(),
        })
    }

    /// Full snapshot of one workspace
    pub fn pull(&self, credential: Option<&str>, request: &PullRequest) -> ApiResult<PullResponse> {
        let user = self.authenticate(credential)?;
        let db = self.db()?;

        if db.workspace_owner(request.workspace_id)?.as_deref() != Some(user) {
            debug!("Pull of absent workspace {} by {}", request.workspace_id, user);
            return Ok(PullResponse {
                workspace: None,
                notes: Vec::new(),
                blocks: Vec::new(),
                hash: EMPTY_HASH.to_string(),
            });
        }

        let hash = db.refresh_hash(request.workspace_id)?;
        let tree = db.load_workspace(request.workspace_id, request.include_blocks)?;
        debug!(
            "Pull of workspace {}: {} note(s), {} block(s)",
            request.workspace_id,
            tree.notes.len(),
            tree.blocks.len()
        );
        Ok(PullResponse {
            workspace: tree.workspace,
            notes: tree.notes,
            blocks: tree.blocks,
            hash,
        })
    }

    /// Apply a batch of changes in one transaction
    pub fn push(&self, credential: Option<&str>, request: &PushRequest) -> ApiResult<PushResponse> {
        let user = self.authenticate(credential)?;
        if request.changes.len() > MAX_BATCH {
            return Err(ApiError::InvalidRequest(format!(
                "batch of {} changes exceeds the limit of {}",
                request.changes.len(),
                MAX_BATCH
            )));
        }

        let mut db = self.db()?;
        let result = db.apply_batch(user, &request.changes, models::now())?;
        info!(
            "Push from {}: {} applied, {} conflict(s)",
            user,
            result.updates.len(),
            result.conflicts.len()
        );
        Ok(PushResponse {
            updates: result.updates,
            conflicts: result.conflicts,
            sync_token: Self::sync_token(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::hash::workspace_hash;
    use arbor_core::models::{ChangeAction, Workspace};
    use arbor_core::protocol::{ChangeItem, EntityData};
    use std::collections::BTreeMap;

    fn gateway() -> Gateway {
        let tokens = HashMap::from([
            ("tok-a".to_string(), "alice".to_string()),
            ("tok-b".to_string(), "bob".to_string()),
        ]);
        Gateway::new(ServerDb::open_in_memory().unwrap(), tokens, Duration::from_secs(60))
    }

    fn push_workspace(gw: &Gateway, token: &str, ws: &Workspace) {
        let request = PushRequest {
            changes: vec![ChangeItem::write(
                ChangeAction::Create,
                ws.id,
                &EntityData::from(ws),
                None,
            )],
            sync_token: None,
        };
        let response = gw.push(Some(token), &request).unwrap();
        assert_eq!(response.updates.len(), 1);
    }

    #[test]
    fn test_authentication() {
        let gw = gateway();
        assert_eq!(gw.authenticate(Some("tok-a")).unwrap(), "alice");
        assert!(matches!(gw.authenticate(None), Err(ApiError::Unauthorized(_))));
        assert!(matches!(gw.authenticate(Some("")), Err(ApiError::Unauthorized(_))));
        assert!(matches!(gw.authenticate(Some("nope")), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_status_reports_differing_hash() {
        let gw = gateway();
        let ws = Workspace::new("alice", "Home");
        push_workspace(&gw, "tok-a", &ws);

        let request = StatusRequest {
            workspace_hashes: BTreeMap::from([(ws.id, "xyz999".to_string())]),
        };
        let response = gw.status(Some("tok-a"), &request).unwrap();
        assert_eq!(response.mismatches.len(), 1);
        assert_eq!(response.mismatches[0].workspace_id, ws.id);
    }

    #[test]
    fn test_status_matching_hash_is_clean() {
        let gw = gateway();
        let ws = Workspace::new("alice", "Home");
        push_workspace(&gw, "tok-a", &ws);

        let pulled = gw
            .pull(Some("tok-a"), &PullRequest { workspace_id: ws.id, include_blocks: true })
            .unwrap();
        let request = StatusRequest {
            workspace_hashes: BTreeMap::from([(ws.id, pulled.hash.clone())]),
        };
        assert!(gw.status(Some("tok-a"), &request).unwrap().mismatches.is_empty());
        assert_eq!(
            pulled.hash,
            workspace_hash(pulled.workspace.as_ref(), &pulled.notes, &pulled.blocks)
        );
    }

    #[test]
    fn test_status_cold_cache_is_mismatch() {
        let tokens = HashMap::from([("tok-a".to_string(), "alice".to_string())]);
        let gw = Gateway::new(ServerDb::open_in_memory().unwrap(), tokens, Duration::ZERO);
        let ws = Workspace::new("alice", "Home");
        push_workspace(&gw, "tok-a", &ws);

        let pulled = gw
            .pull(Some("tok-a"), &PullRequest { workspace_id: ws.id, include_blocks: true })
            .unwrap();
        let request = StatusRequest {
            workspace_hashes: BTreeMap::from([(ws.id, pulled.hash)]),
        };
        let response = gw.status(Some("tok-a"), &request).unwrap();
        assert_eq!(response.mismatches.len(), 1);
        assert_eq!(response.mismatches[0].workspace_id, ws.id);
    }

    #[test]
    fn test_status_includes_unsubmitted_workspaces() {
        let gw = gateway();
        let ws = Workspace::new("alice", "Created elsewhere");
        push_workspace(&gw, "tok-a", &ws);

        let response = gw.status(Some("tok-a"), &StatusRequest::default()).unwrap();
        assert_eq!(response.mismatches.len(), 1);
        assert!(gw
            .status(Some("tok-b"), &StatusRequest::default())
            .unwrap()
            .mismatches
            .is_empty());
    }

    #[test]
    fn test_pull_of_foreign_workspace_is_empty() {
        let gw = gateway();
        let ws = Workspace::new("alice", "Private");
        push_workspace(&gw, "tok-a", &ws);

        let response = gw
            .pull(Some("tok-b"), &PullRequest { workspace_id: ws.id, include_blocks: true })
            .unwrap();
        assert!(response.workspace.is_none());
        assert_eq!(response.hash, EMPTY_HASH);
    }

    #[test]
    fn test_oversized_batch_is_rejected() {
        let gw = gateway();
        let ws = Workspace::new("alice", "Big");
        let item = ChangeItem::write(ChangeAction::Create, ws.id, &EntityData::from(&ws), None);
        let request = PushRequest {
            changes: vec![item; MAX_BATCH + 1],
            sync_token: None,
        };
        assert!(matches!(
            gw.push(Some("tok-a"), &request),
            Err(ApiError::InvalidRequest(_))
        ));
    }
}
