//! The relay's WebSocket connection handler: one JSON-framed bidirectional
//! channel per peer.
//!
//! Ordering invariants enforced here: authentication strictly precedes
//! registration; registration strictly precedes any publish/accept;
//! `connection_confirmed` is the sole trigger that lets a peer register.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hokipoki_core::unix_timestamp;
use hokipoki_proto::wire::Frame;
use hokipoki_proto::PeerRole;

use crate::matching;
use crate::state::{PeerHandle, RelayState};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(mut socket: WebSocket, state: RelayState) {
    let Some(peer_id) = authenticate(&mut socket, &state).await else {
        let _ = socket.close().await;
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    state
        .insert_peer(PeerHandle {
            peer_id: peer_id.clone(),
            user_id: rx_user_id(&state, &peer_id).await,
            role: None,
            workspace_ids: Vec::new(),
            outbound: tx,
        })
        .await;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = dispatch(&state, &peer_id, &text).await {
                            warn!(peer_id, error = %e, "frame dispatch failed");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(peer_id, error = %e, "websocket recv error");
                        break;
                    }
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    on_disconnect(&state, &peer_id).await;
}

/// First frame from a peer must be `{type:"authenticate", token}`; any
/// other first frame, or an invalid token, results in disconnect.
async fn authenticate(socket: &mut WebSocket, state: &RelayState) -> Option<String> {
    let Some(Ok(Message::Text(text))) = socket.recv().await else {
        return None;
    };
    let Ok(Frame::Authenticate { token }) = serde_json::from_str::<Frame>(&text) else {
        return None;
    };

    let claims = match state.jwks().validate(&token).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "authenticate frame rejected");
            return None;
        }
    };

    let peer_id = Uuid::new_v4().to_string();
    state.remember_user(&peer_id, claims.sub.clone()).await;

    let confirmed = Frame::ConnectionConfirmed {
        peer_id: peer_id.clone(),
    };
    if send_frame(socket, &confirmed).await.is_err() {
        return None;
    }

    info!(peer_id, user_id = %claims.sub, "peer authenticated");
    Some(peer_id)
}

async fn rx_user_id(state: &RelayState, peer_id: &str) -> String {
    state.pending_user(peer_id).await.unwrap_or_default()
}

async fn dispatch(state: &RelayState, peer_id: &str, text: &str) -> Result<(), crate::error::RelayError> {
    let frame: Frame = serde_json::from_str(text)
        .map_err(|e| crate::error::RelayError::AuthFailed(format!("invalid frame: {e}")))?;

    match frame {
        Frame::Authenticate { .. } => {
            // Registration already happened; a second authenticate is a
            // protocol violation we simply ignore rather than disconnect,
            // since nothing in the spec requires hard-failing on it.
        }
        Frame::RegisterProvider { payload } => {
            state
                .set_role(peer_id, PeerRole::Provider, payload.workspace_ids.clone())
                .await;
            state
                .register_provider(peer_id, payload.tools, payload.workspace_ids, unix_timestamp())
                .await;
        }
        Frame::RegisterRequester { payload } => {
            state
                .set_role(peer_id, PeerRole::Requester, vec![payload.workspace_id])
                .await;
        }
        Frame::PublishTask { payload } => {
            // The task's `requester_id` must key into the peer-id-indexed
            // maps (`peers`, `matched`) that `send`/`bind_match` use, so it
            // is this connection's `peer_id`, not the OIDC `sub` — a task
            // is addressed to a live socket, not a user identity.
            if state.requester_has_active_task(peer_id).await {
                // The CLI-side requester flow is expected to check this
                // itself before publishing; if it slips through anyway,
                // silently drop rather than corrupt the invariant.
                return Ok(());
            }
            let task_id = matching::publish_task(state, peer_id, payload).await;
            state
                .send(peer_id, Frame::TaskPublished { task_id })
                .await;
        }
        Frame::AcceptTask { task_id } => {
            matching::accept_task(state, &task_id, peer_id).await;
        }
        Frame::DeclineTask { task_id } => {
            matching::decline_task(state, &task_id, peer_id).await;
        }
        Frame::P2pRelay { from, to, payload } => {
            if state.is_matched_pair(&from, &to).await {
                state.send(&to, Frame::P2pRelay { from, to, payload }).await;
            } else {
                warn!(from, to, "dropped p2p_relay frame between unmatched peers");
            }
        }
        Frame::CancelTask { task_id, reason } => {
            matching::cancel_task(state, &task_id, reason).await;
        }
        // Relay-to-peer-only frames arriving from a peer are protocol
        // violations; ignore rather than disconnect.
        Frame::ConnectionConfirmed { .. }
        | Frame::TaskPublished { .. }
        | Frame::NewTask { .. }
        | Frame::TaskMatched { .. }
        | Frame::TaskAccepted { .. }
        | Frame::NoProvidersAvailable { .. }
        | Frame::TaskCancelled { .. } => {}
    }
    Ok(())
}

/// On socket close, cancel any task this peer is still an active party to
/// — the same internal path an explicit `cancel_task` frame takes.
async fn on_disconnect(state: &RelayState, peer_id: &str) {
    if let Some(task_id) = state.active_task_for_peer(peer_id).await {
        matching::cancel_task(state, &task_id, Some("peer disconnected".to_string())).await;
    }
    state.remove_peer(peer_id).await;
    info!(peer_id, "peer disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    socket.send(Message::Text(text.into())).await
}
