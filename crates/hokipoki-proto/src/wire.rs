//! The Relay Protocol's outer frame: `{type, ...}`, one object per
//! WebSocket text message.

use serde::{Deserialize, Serialize};

use crate::model::Task;
use crate::p2p::P2pEnvelope;

/// A single frame of the bidirectional relay channel.
///
/// Tagged on `type` with `rename_all = "snake_case"` so the wire spelling
/// matches the protocol document exactly (`connection_confirmed`,
/// `register_provider`, `no_providers_available`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame a peer must send. Any other first frame results in
    /// disconnect.
    Authenticate { token: String },
    /// Relay's reply to a successful `authenticate`.
    ConnectionConfirmed {
        #[serde(rename = "peerId")]
        peer_id: String,
    },

    RegisterProvider { payload: RegisterProviderPayload },
    RegisterRequester { payload: RegisterRequesterPayload },

    PublishTask { payload: PublishTaskPayload },
    TaskPublished {
        #[serde(rename = "taskId")]
        task_id: String,
    },

    NewTask { task: Task },
    AcceptTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    DeclineTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },

    TaskMatched {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(rename = "providerId")]
        provider_id: String,
    },
    TaskAccepted {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(rename = "requesterId")]
        requester_id: String,
    },
    NoProvidersAvailable {
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },

    /// Opaque-to-the-relay channel between a matched requester/provider pair.
    P2pRelay {
        from: String,
        to: String,
        payload: P2pEnvelope,
    },

    CancelTask {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    TaskCancelled {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Payload of a `register_provider` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterProviderPayload {
    pub tools: Vec<String>,
    #[serde(rename = "workspaceIds")]
    pub workspace_ids: Vec<String>,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub token: String,
}

/// Payload of a `register_requester` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequesterPayload {
    #[serde(rename = "workspaceId")]
    pub workspace_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Payload of a `publish_task` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishTaskPayload {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub task: String,
    pub description: String,
    #[serde(rename = "estimatedDuration")]
    pub estimated_duration: u32,
    pub credits: u32,
    #[serde(rename = "workspaceId")]
    pub workspace_id: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_frame_roundtrips() {
        let frame = Frame::Authenticate {
            token: "jwt-here".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"authenticate\""));
        let back: Frame = serde_json::from_str(&json).unwrap();
        match back {
            Frame::Authenticate { token } => assert_eq!(token, "jwt-here"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn non_authenticate_first_frame_is_still_valid_json_but_caller_must_gate() {
        // The gating rule ("first frame must be authenticate") is a relay
        // connection-handler invariant, not something the wire type encodes.
        let frame = Frame::RegisterRequester {
            payload: RegisterRequesterPayload {
                workspace_id: "ws-1".to_string(),
                user_id: "user-1".to_string(),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "register_requester");
    }

    #[test]
    fn cancel_task_frame_omits_absent_reason() {
        let frame = Frame::CancelTask {
            task_id: "t1".to_string(),
            reason: None,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn no_providers_available_uses_camel_case_field_names() {
        let frame = Frame::NoProvidersAvailable {
            tool: "codex".to_string(),
            model: Some("gpt-5".to_string()),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "no_providers_available");
        assert_eq!(json["tool"], "codex");
        assert_eq!(json["model"], "gpt-5");
    }

    #[test]
    fn p2p_relay_frame_carries_opaque_envelope() {
        use crate::p2p::{P2pEnvelope, P2pPayload};

        let frame = Frame::P2pRelay {
            from: "peer-a".to_string(),
            to: "peer-b".to_string(),
            payload: P2pEnvelope {
                payload: P2pPayload::ConfirmationAck,
                timestamp: 1_700_000_000,
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "p2p_relay");
        assert_eq!(json["payload"]["type"], "confirmation_ack");
    }
}
