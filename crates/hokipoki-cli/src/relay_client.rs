//! Relay WebSocket client: the JSON-over-WebSocket transport shared by the
//! Requester Flow and the Provider Flow. Frames are exchanged with a relay
//! connection that survives transient drops via an exponential-backoff
//! reconnect loop — the same attempt-counter/backoff shape the daemon's
//! tunnel client uses for its own relay connection, reused here for the
//! Relay Protocol's socket instead of a gRPC tunnel stream.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};

use hokipoki_proto::Frame;

use crate::error::FlowError;

/// Exponential backoff policy for relay reconnects, identical in shape to
/// the daemon's tunnel-client reconnect policy.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: Some(5),
        }
    }
}

impl ReconnectPolicy {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = (base_ms * self.multiplier.powi(attempt as i32)).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live, authenticated connection to the relay: the `authenticate`
/// handshake has already completed and `connection_confirmed` has been
/// received by the time `connect` returns.
pub struct RelayConnection {
    socket: WsStream,
    pub peer_id: String,
}

impl RelayConnection {
    /// Dial `url`, send `{type:"authenticate", token}` as the mandatory
    /// first frame, and wait for `connection_confirmed`. Any other first
    /// frame from the relay, or a close, is a hard authentication failure.
    pub async fn connect(url: &str, token: &str) -> Result<Self, FlowError> {
        let (mut socket, _) = connect_async(url)
            .await
            .map_err(|e| FlowError::RelayDisconnected(e.to_string()))?;

        let authenticate = Frame::Authenticate { token: token.to_string() };
        send_frame(&mut socket, &authenticate).await?;

        match recv_frame(&mut socket).await? {
            Some(Frame::ConnectionConfirmed { peer_id }) => {
                info!(peer_id, "relay authenticated");
                Ok(Self { socket, peer_id })
            }
            Some(other) => Err(FlowError::RelayAuthFailed(format!(
                "expected connection_confirmed, got {other:?}"
            ))),
            None => Err(FlowError::RelayAuthFailed(
                "relay closed the connection during handshake".to_string(),
            )),
        }
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), FlowError> {
        send_frame(&mut self.socket, frame).await
    }

    /// Next frame from the relay, or `None` on a clean close.
    pub async fn recv(&mut self) -> Result<Option<Frame>, FlowError> {
        recv_frame(&mut self.socket).await
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

async fn send_frame(socket: &mut WsStream, frame: &Frame) -> Result<(), FlowError> {
    let text = serde_json::to_string(frame)?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| FlowError::RelayDisconnected(e.to_string()))
}

async fn recv_frame(socket: &mut WsStream) -> Result<Option<Frame>, FlowError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => continue,
            Some(Err(e)) => return Err(FlowError::RelayDisconnected(e.to_string())),
        }
    }
}

/// Dial `url` with exponential-backoff retries, authenticating each
/// attempt. Gives up once `policy` is exhausted.
pub async fn connect_with_backoff(
    url: &str,
    token: &str,
    policy: ReconnectPolicy,
) -> Result<RelayConnection, FlowError> {
    let mut attempt: u32 = 0;
    loop {
        match RelayConnection::connect(url, token).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                if !policy.should_retry(attempt) {
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(error = %e, attempt, delay_ms = delay.as_millis(), "relay connect failed, retrying");
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            max_attempts: None,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            ..ReconnectPolicy::default()
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn should_retry_unlimited_when_max_attempts_is_none() {
        let policy = ReconnectPolicy {
            max_attempts: None,
            ..ReconnectPolicy::default()
        };
        assert!(policy.should_retry(1000));
    }
}
