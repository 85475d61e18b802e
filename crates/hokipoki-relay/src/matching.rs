//! Task publish/match state machine.
//!
//! `pending -> offered(provider) -> (accepted|declined -> re-offer)+ ->
//! accepted -> in_progress -> (completed|failed|cancelled)`.

use hokipoki_core::unix_timestamp;
use hokipoki_proto::wire::{Frame, PublishTaskPayload};
use hokipoki_proto::{Task, TaskStatus};
use tracing::info;
use uuid::Uuid;

use crate::state::RelayState;

/// Assign a task id, persist it `pending`, and immediately start
/// matching. Returns the new task's id.
pub async fn publish_task(state: &RelayState, requester_id: &str, payload: PublishTaskPayload) -> String {
    let task_id = Uuid::new_v4().to_string();
    let task = Task {
        id: task_id.clone(),
        requester_id: requester_id.to_string(),
        tool: payload.tool.clone(),
        model: payload.model.clone(),
        description: payload.description,
        workspace_id: payload.workspace_id.clone(),
        credits: payload.credits,
        status: TaskStatus::Pending,
        created_at: unix_timestamp(),
        provider_id: None,
        completed_at: None,
        commit_summary: None,
    };
    state.insert_task(task).await;
    offer_next_candidate(state, &task_id, &payload.tool, &payload.workspace_id).await;
    task_id
}

/// Offer the task to the next round-robin candidate, or emit
/// `no_providers_available` if the candidate pool (minus declines) is
/// empty.
pub async fn offer_next_candidate(state: &RelayState, task_id: &str, tool: &str, workspace_id: &str) {
    let declined = state.declined_set(task_id).await;
    let candidates = state.candidates(tool, workspace_id, &declined).await;

    let Some(task) = state.get_task(task_id).await else {
        return;
    };

    for candidate in candidates {
        if state.provider_has_active_task(&candidate).await {
            continue;
        }
        state.set_offered(task_id, Some(candidate.clone())).await;
        state.set_status(task_id, TaskStatus::Offered).await;
        state.mark_offered(&candidate, unix_timestamp()).await;

        let delivered = state
            .send(&candidate, Frame::NewTask { task: task.clone() })
            .await;
        if delivered {
            info!(task_id, provider = %candidate, "offered task");
            return;
        }
    }

    info!(task_id, tool, "no providers available");
    state.set_status(task_id, TaskStatus::Failed).await;
    state
        .send(
            &task.requester_id,
            Frame::NoProvidersAvailable {
                tool: tool.to_string(),
                model: task.model.clone(),
            },
        )
        .await;
}

/// A provider accepted its offer: bind the match and notify both sides.
pub async fn accept_task(state: &RelayState, task_id: &str, provider_id: &str) {
    let Some(mut task) = state.get_task(task_id).await else {
        return;
    };
    if state.offered_to(task_id).await.as_deref() != Some(provider_id) {
        return;
    }

    task.provider_id = Some(provider_id.to_string());
    state.set_status(task_id, TaskStatus::Accepted).await;
    state.bind_match(&task.requester_id, provider_id).await;

    state
        .send(
            &task.requester_id,
            Frame::TaskMatched {
                task_id: task_id.to_string(),
                provider_id: provider_id.to_string(),
            },
        )
        .await;
    state
        .send(
            provider_id,
            Frame::TaskAccepted {
                task_id: task_id.to_string(),
                requester_id: task.requester_id.clone(),
            },
        )
        .await;
    info!(task_id, provider = %provider_id, "task matched");
}

/// A provider declined: remove it from the candidate set for this task and
/// re-offer to the next candidate.
pub async fn decline_task(state: &RelayState, task_id: &str, provider_id: &str) {
    if state.offered_to(task_id).await.as_deref() != Some(provider_id) {
        return;
    }
    state.decline(task_id, provider_id).await;
    if let Some(task) = state.get_task(task_id).await {
        offer_next_candidate(state, task_id, &task.tool, &task.workspace_id).await;
    }
}

/// Unify the two `task_cancelled` triggers: explicit `cancel_task` frames
/// and a peer's socket closing while a task is still active both route
/// through this single path.
pub async fn cancel_task(state: &RelayState, task_id: &str, reason: Option<String>) {
    let Some(task) = state.get_task(task_id).await else {
        return;
    };
    state.set_status(task_id, TaskStatus::Cancelled).await;
    state.unbind_match(&task.requester_id).await;
    if let Some(provider_id) = &task.provider_id {
        state.unbind_match(provider_id).await;
    }

    let frame = Frame::TaskCancelled {
        task_id: task_id.to_string(),
        reason: reason.clone(),
    };
    state.send(&task.requester_id, frame.clone()).await;
    if let Some(provider_id) = &task.provider_id {
        state.send(provider_id, frame).await;
    }
    info!(task_id, reason = ?reason, "task cancelled");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn connect(state: &RelayState, peer_id: &str, user_id: &str) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .insert_peer(crate::state::PeerHandle {
                peer_id: peer_id.to_string(),
                user_id: user_id.to_string(),
                role: None,
                workspace_ids: vec![],
                outbound: tx,
            })
            .await;
        rx
    }

    fn publish_payload() -> PublishTaskPayload {
        PublishTaskPayload {
            tool: "claude".to_string(),
            model: None,
            task: "fix typo".to_string(),
            description: "fix typo".to_string(),
            estimated_duration: 60,
            credits: 1,
            workspace_id: "ws-1".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_offers_single_matching_provider() {
        let state = RelayState::new();
        let mut req_rx = connect(&state, "req-1", "user-req").await;
        let mut prov_rx = connect(&state, "prov-1", "user-prov").await;
        state
            .register_provider("prov-1", vec!["claude".to_string()], vec!["ws-1".to_string()], 0)
            .await;

        let task_id = publish_task(&state, "req-1", publish_payload()).await;

        let frame = prov_rx.try_recv().unwrap();
        assert!(matches!(frame, Frame::NewTask { task } if task.id == task_id));
        assert!(req_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn decline_reoffers_to_next_candidate() {
        let state = RelayState::new();
        let _req_rx = connect(&state, "req-1", "user-req").await;
        let mut p1_rx = connect(&state, "p1", "user-p1").await;
        let mut p2_rx = connect(&state, "p2", "user-p2").await;
        state
            .register_provider("p1", vec!["claude".to_string()], vec!["ws-1".to_string()], 0)
            .await;
        state
            .register_provider("p2", vec!["claude".to_string()], vec!["ws-1".to_string()], 1)
            .await;

        let task_id = publish_task(&state, "req-1", publish_payload()).await;
        assert!(p1_rx.try_recv().is_ok());
        assert!(p2_rx.try_recv().is_err());

        decline_task(&state, &task_id, "p1").await;
        assert!(p2_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn all_decline_marks_task_failed_and_notifies_requester() {
        let state = RelayState::new();
        let mut req_rx = connect(&state, "req-1", "user-req").await;
        let _p1_rx = connect(&state, "p1", "user-p1").await;
        state
            .register_provider("p1", vec!["claude".to_string()], vec!["ws-1".to_string()], 0)
            .await;

        let task_id = publish_task(&state, "req-1", publish_payload()).await;
        decline_task(&state, &task_id, "p1").await;

        let frame = req_rx.try_recv().unwrap();
        assert!(matches!(frame, Frame::NoProvidersAvailable { tool, .. } if tool == "claude"));

        let task = state.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn accept_binds_match_and_notifies_both_sides() {
        let state = RelayState::new();
        let mut req_rx = connect(&state, "req-1", "user-req").await;
        let mut prov_rx = connect(&state, "prov-1", "user-prov").await;
        state
            .register_provider("prov-1", vec!["claude".to_string()], vec!["ws-1".to_string()], 0)
            .await;

        let task_id = publish_task(&state, "req-1", publish_payload()).await;
        prov_rx.try_recv().unwrap();

        accept_task(&state, &task_id, "prov-1").await;

        assert!(matches!(req_rx.try_recv().unwrap(), Frame::TaskMatched { .. }));
        assert!(matches!(prov_rx.try_recv().unwrap(), Frame::TaskAccepted { .. }));
        assert!(state.is_matched_pair("req-1", "prov-1").await);
    }

    #[tokio::test]
    async fn cancel_notifies_both_sides_and_unbinds() {
        let state = RelayState::new();
        let mut req_rx = connect(&state, "req-1", "user-req").await;
        let mut prov_rx = connect(&state, "prov-1", "user-prov").await;
        state
            .register_provider("prov-1", vec!["claude".to_string()], vec!["ws-1".to_string()], 0)
            .await;

        let task_id = publish_task(&state, "req-1", publish_payload()).await;
        prov_rx.try_recv().unwrap();
        accept_task(&state, &task_id, "prov-1").await;
        req_rx.try_recv().unwrap();
        prov_rx.try_recv().unwrap();

        cancel_task(&state, &task_id, Some("user pressed ctrl-c".to_string())).await;

        assert!(matches!(req_rx.try_recv().unwrap(), Frame::TaskCancelled { .. }));
        assert!(matches!(prov_rx.try_recv().unwrap(), Frame::TaskCancelled { .. }));
        assert!(!state.is_matched_pair("req-1", "prov-1").await);
    }
}
