//! The relay's authoritative in-memory state: connected peers, the
//! provider pool, and the task table.
//!
//! The task queue is not durably persisted across relay restarts —
//! persisting it would change the matching ordering in ways that need
//! operator input to pin down. Everything here lives behind a
//! single-process `Arc<RwLock<HashMap<_, _>>>`; the relay is the sole
//! mutator of the task table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

use hokipoki_proto::wire::Frame;
use hokipoki_proto::{PeerRole, Task, TaskStatus};

use crate::auth::JwksValidator;

/// A connected, authenticated socket. Created on successful `authenticate`,
/// destroyed on socket close.
pub struct PeerHandle {
    pub peer_id: String,
    pub user_id: String,
    pub role: Option<PeerRole>,
    pub workspace_ids: Vec<String>,
    pub outbound: mpsc::UnboundedSender<Frame>,
}

/// A provider's advertised capabilities, relay-owned and unique per
/// connected peer.
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    pub peer_id: String,
    pub tools: HashSet<String>,
    pub workspace_ids: Vec<String>,
    /// Unix timestamp this provider was last offered a task; round-robin
    /// matching offers the least-recently-offered candidate first.
    pub last_offered_at: i64,
}

/// Relay-side bookkeeping layered on top of the wire `Task`: which
/// providers have already declined, and who the task is currently offered
/// to (if anyone).
pub struct TaskRecord {
    pub task: Task,
    pub declined_by: HashSet<String>,
    pub offered_to: Option<String>,
}

/// The relay's authoritative state, shared across all connection handlers.
#[derive(Clone)]
pub struct RelayState(Arc<Inner>);

struct Inner {
    peers: RwLock<HashMap<String, PeerHandle>>,
    providers: RwLock<HashMap<String, ProviderRecord>>,
    tasks: RwLock<HashMap<String, TaskRecord>>,
    /// `peer_id -> peer_id` for the duration of an `accepted|in_progress`
    /// task; gates `p2p_relay` forwarding.
    matched: RwLock<HashMap<String, String>>,
    /// User id resolved during `authenticate`, before the peer's
    /// `PeerHandle` (which needs an outbound channel from the socket task)
    /// has been inserted.
    pending_users: RwLock<HashMap<String, String>>,
    jwks: Arc<JwksValidator>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::with_issuer("https://auth.hoki-poki.ai/realms/hokipoki")
    }
}

impl RelayState {
    /// Test/default constructor; the JWKS issuer is unreachable, so tests
    /// that exercise matching/state logic directly (bypassing
    /// `authenticate`) are unaffected.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issuer(issuer: impl Into<String>) -> Self {
        Self(Arc::new(Inner {
            peers: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            matched: RwLock::new(HashMap::new()),
            pending_users: RwLock::new(HashMap::new()),
            jwks: Arc::new(JwksValidator::new(issuer)),
        }))
    }

    pub fn jwks(&self) -> &JwksValidator {
        &self.0.jwks
    }

    pub async fn remember_user(&self, peer_id: &str, user_id: String) {
        self.0.pending_users.write().await.insert(peer_id.to_string(), user_id);
    }

    pub async fn pending_user(&self, peer_id: &str) -> Option<String> {
        self.0.pending_users.write().await.remove(peer_id)
    }

    pub async fn insert_peer(&self, peer: PeerHandle) {
        self.0.peers.write().await.insert(peer.peer_id.clone(), peer);
    }

    pub async fn remove_peer(&self, peer_id: &str) {
        self.0.peers.write().await.remove(peer_id);
        self.0.providers.write().await.remove(peer_id);
        self.0.matched.write().await.remove(peer_id);
        self.0.pending_users.write().await.remove(peer_id);
    }

    /// Any non-terminal task where `peer_id` is either the requester or the
    /// bound provider — used to unify the disconnect and explicit-cancel
    /// paths onto a single cancellation routine.
    pub async fn active_task_for_peer(&self, peer_id: &str) -> Option<String> {
        self.0
            .tasks
            .read()
            .await
            .values()
            .find(|t| {
                !is_terminal(t.task.status)
                    && (t.task.requester_id == peer_id || t.task.provider_id.as_deref() == Some(peer_id))
            })
            .map(|t| t.task.id.clone())
    }

    pub async fn set_role(&self, peer_id: &str, role: PeerRole, workspace_ids: Vec<String>) {
        if let Some(peer) = self.0.peers.write().await.get_mut(peer_id) {
            peer.role = Some(role);
            peer.workspace_ids = workspace_ids;
        }
    }

    pub async fn send(&self, peer_id: &str, frame: Frame) -> bool {
        let peers = self.0.peers.read().await;
        match peers.get(peer_id) {
            Some(peer) => peer.outbound.send(frame).is_ok(),
            None => false,
        }
    }

    pub async fn user_id_of(&self, peer_id: &str) -> Option<String> {
        self.0.peers.read().await.get(peer_id).map(|p| p.user_id.clone())
    }

    pub async fn register_provider(
        &self,
        peer_id: &str,
        tools: Vec<String>,
        workspace_ids: Vec<String>,
        now: i64,
    ) {
        self.0.providers.write().await.insert(
            peer_id.to_string(),
            ProviderRecord {
                peer_id: peer_id.to_string(),
                tools: tools.into_iter().collect(),
                workspace_ids,
                last_offered_at: now,
            },
        );
    }

    /// Candidate providers for `tool`/`workspace_id`, excluding a task's
    /// already-declined set, ordered oldest-`last_offered_at`-first
    /// (round-robin).
    pub async fn candidates(
        &self,
        tool: &str,
        workspace_id: &str,
        excluding: &HashSet<String>,
    ) -> Vec<String> {
        let providers = self.0.providers.read().await;
        let mut matches: Vec<&ProviderRecord> = providers
            .values()
            .filter(|p| {
                p.tools.contains(tool)
                    && p.workspace_ids.iter().any(|w| w == workspace_id)
                    && !excluding.contains(&p.peer_id)
            })
            .collect();
        matches.sort_by_key(|p| p.last_offered_at);
        matches.into_iter().map(|p| p.peer_id.clone()).collect()
    }

    pub async fn mark_offered(&self, peer_id: &str, now: i64) {
        if let Some(record) = self.0.providers.write().await.get_mut(peer_id) {
            record.last_offered_at = now;
        }
    }

    pub async fn insert_task(&self, task: Task) {
        let id = task.id.clone();
        self.0.tasks.write().await.insert(
            id,
            TaskRecord {
                task,
                declined_by: HashSet::new(),
                offered_to: None,
            },
        );
    }

    /// A requester has at most one active (non-terminal) task at a time —
    /// the data-model invariant the Requester Flow's `ActiveTaskExists`
    /// error enforces.
    pub async fn requester_has_active_task(&self, requester_id: &str) -> bool {
        self.0
            .tasks
            .read()
            .await
            .values()
            .any(|t| t.task.requester_id == requester_id && !is_terminal(t.task.status))
    }

    pub async fn set_status(&self, task_id: &str, status: TaskStatus) {
        if let Some(record) = self.0.tasks.write().await.get_mut(task_id) {
            record.task.status = status;
        }
    }

    pub async fn set_offered(&self, task_id: &str, provider_id: Option<String>) {
        if let Some(record) = self.0.tasks.write().await.get_mut(task_id) {
            record.offered_to = provider_id;
        }
    }

    pub async fn decline(&self, task_id: &str, provider_id: &str) {
        if let Some(record) = self.0.tasks.write().await.get_mut(task_id) {
            record.declined_by.insert(provider_id.to_string());
            record.offered_to = None;
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.0.tasks.read().await.get(task_id).map(|r| r.task.clone())
    }

    pub async fn declined_set(&self, task_id: &str) -> HashSet<String> {
        self.0
            .tasks
            .read()
            .await
            .get(task_id)
            .map(|r| r.declined_by.clone())
            .unwrap_or_default()
    }

    pub async fn offered_to(&self, task_id: &str) -> Option<String> {
        self.0.tasks.read().await.get(task_id).and_then(|r| r.offered_to.clone())
    }

    /// Bind a requester/provider pair for the duration of the match — both
    /// directions, so either side's `p2p_relay` frame is authorized.
    pub async fn bind_match(&self, requester_id: &str, provider_id: &str) {
        let mut matched = self.0.matched.write().await;
        matched.insert(requester_id.to_string(), provider_id.to_string());
        matched.insert(provider_id.to_string(), requester_id.to_string());
    }

    pub async fn unbind_match(&self, peer_id: &str) {
        let mut matched = self.0.matched.write().await;
        if let Some(other) = matched.remove(peer_id) {
            matched.remove(&other);
        }
    }

    /// Is `to` currently matched with `from`? Gates `p2p_relay` forwarding —
    /// the relay never inspects the payload, only who it is allowed to
    /// reach.
    pub async fn is_matched_pair(&self, from: &str, to: &str) -> bool {
        self.0.matched.read().await.get(from).is_some_and(|m| m == to)
    }

    /// A provider may be offered another task only after its current one
    /// reaches a terminal state.
    pub async fn provider_has_active_task(&self, provider_id: &str) -> bool {
        self.0
            .tasks
            .read()
            .await
            .values()
            .any(|t| t.task.provider_id.as_deref() == Some(provider_id) && !is_terminal(t.task.status))
    }
}

fn is_terminal(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_task(id: &str, requester: &str, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            requester_id: requester.to_string(),
            tool: "claude".to_string(),
            model: None,
            description: "fix it".to_string(),
            workspace_id: "ws-1".to_string(),
            credits: 1,
            status,
            created_at: 0,
            provider_id: None,
            completed_at: None,
            commit_summary: None,
        }
    }

    #[tokio::test]
    async fn candidates_excludes_wrong_tool_and_workspace() {
        let state = RelayState::new();
        state
            .register_provider("p1", vec!["claude".to_string()], vec!["ws-1".to_string()], 0)
            .await;
        state
            .register_provider("p2", vec!["codex".to_string()], vec!["ws-1".to_string()], 0)
            .await;
        state
            .register_provider("p3", vec!["claude".to_string()], vec!["ws-2".to_string()], 0)
            .await;

        let candidates = state.candidates("claude", "ws-1", &HashSet::new()).await;
        assert_eq!(candidates, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn candidates_are_round_robin_ordered() {
        let state = RelayState::new();
        state
            .register_provider("p1", vec!["claude".to_string()], vec!["ws-1".to_string()], 100)
            .await;
        state
            .register_provider("p2", vec!["claude".to_string()], vec!["ws-1".to_string()], 50)
            .await;

        let candidates = state.candidates("claude", "ws-1", &HashSet::new()).await;
        assert_eq!(candidates, vec!["p2".to_string(), "p1".to_string()]);
    }

    #[tokio::test]
    async fn declined_providers_are_excluded() {
        let state = RelayState::new();
        state
            .register_provider("p1", vec!["claude".to_string()], vec!["ws-1".to_string()], 0)
            .await;
        state.insert_task(make_task("t1", "req-1", TaskStatus::Offered)).await;
        state.decline("t1", "p1").await;

        let declined = state.declined_set("t1").await;
        let candidates = state.candidates("claude", "ws-1", &declined).await;
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn requester_active_task_invariant() {
        let state = RelayState::new();
        state.insert_task(make_task("t1", "req-1", TaskStatus::InProgress)).await;
        assert!(state.requester_has_active_task("req-1").await);

        state.set_status("t1", TaskStatus::Completed).await;
        assert!(!state.requester_has_active_task("req-1").await);
    }

    #[tokio::test]
    async fn matched_pair_is_bidirectional() {
        let state = RelayState::new();
        state.bind_match("req-1", "prov-1").await;
        assert!(state.is_matched_pair("req-1", "prov-1").await);
        assert!(state.is_matched_pair("prov-1", "req-1").await);
        assert!(!state.is_matched_pair("req-1", "prov-2").await);
    }
}
