//! Payload types carried inside a `p2p_relay` frame.
//!
//! The relay forwards `p2p_relay` frames verbatim without inspecting
//! `payload.type` — it is opaque to the relay. `P2pPayload` exists so the
//! daemon and CLI crates, which *do* care about the contents, share one
//! definition of the payload shapes actually used by the flow.

use serde::{Deserialize, Serialize};

/// One of the payload kinds exchanged over the P2P relay channel between a
/// matched requester and provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum P2pPayload {
    /// Requester -> Provider: the Ephemeral Git Server's connection details
    /// and the tool/model/task to run.
    GitCredentials {
        #[serde(rename = "gitUrl")]
        git_url: String,
        #[serde(rename = "gitToken")]
        git_token: String,
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(rename = "taskDescription")]
        task_description: String,
    },
    /// Provider -> Requester: the sandbox finished and pushed its commit.
    ExecutionComplete {
        #[serde(rename = "commitSummary")]
        commit_summary: String,
    },
    /// Provider -> Requester: the sandbox failed before producing a commit.
    ExecutionFailed { reason: String },
    /// Requester -> Provider: the diff was retrieved (and, if applicable,
    /// applied) and the task may be marked complete on the backend.
    Confirmation {
        accepted: bool,
        credits: f64,
        #[serde(rename = "taskId")]
        task_id: String,
    },
    /// Provider -> Requester: acknowledges `Confirmation`; both sides may now
    /// tear down.
    ConfirmationAck,
    /// Either direction: a recoverable error occurred mid-flow.
    Error { message: String },
}

/// A single frame of a `p2p_relay` envelope's inner payload, as wrapped by
/// the relay: `{type, payload, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pEnvelope {
    #[serde(flatten)]
    pub payload: P2pPayload,
    pub timestamp: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn git_credentials_serializes_camelcase_fields() {
        let payload = P2pPayload::GitCredentials {
            git_url: "http://example/repo.git".to_string(),
            git_token: "abc".to_string(),
            tool: "claude".to_string(),
            model: None,
            task_description: "fix the bug".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "git_credentials");
        assert_eq!(json["gitUrl"], "http://example/repo.git");
        assert_eq!(json["gitToken"], "abc");
        assert_eq!(json["taskDescription"], "fix the bug");
        assert!(json.get("model").is_none());
    }

    #[test]
    fn confirmation_serializes_credits_and_camelcase_task_id() {
        let payload = P2pPayload::Confirmation {
            accepted: true,
            credits: 2.5,
            task_id: "task-42".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "confirmation",
                "accepted": true,
                "credits": 2.5,
                "taskId": "task-42",
            })
        );
    }

    #[test]
    fn envelope_flattens_payload_alongside_timestamp() {
        let envelope = P2pEnvelope {
            payload: P2pPayload::ExecutionFailed {
                reason: "sandbox crashed".to_string(),
            },
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "execution_failed");
        assert_eq!(json["reason"], "sandbox crashed");
        assert_eq!(json["timestamp"], 1_700_000_000);
    }
}
