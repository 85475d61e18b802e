//! Error types for the relay.

use thiserror::Error;

/// Errors raised by the relay's auth, matching, and routing logic.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("peer sent a frame before completing the authenticate handshake")]
    NotAuthenticated,

    #[error("peer attempted to register twice")]
    AlreadyRegistered,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("task {task_id} is not in a state that allows this transition")]
    InvalidTaskTransition { task_id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
