//! Error types for the CLI's Identity Agent, Tool-Credential Adapter, and
//! Requester/Provider flows.

use thiserror::Error;

/// Errors from the Identity Agent's OIDC authorization-code+PKCE flow.
#[derive(Debug, Error)]
pub enum IdentityAgentError {
    #[error("no cached credential; run `hokipoki auth login`")]
    Reauthenticate,

    #[error("email address is not verified yet")]
    EmailUnverified,

    #[error("loopback callback listener failed: {0}")]
    CallbackFailed(String),

    #[error("callback `state` did not match the authorization request")]
    StateMismatch,

    #[error("token endpoint exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("vault error: {0}")]
    Vault(#[from] hokipoki_crypto::CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the Tool-Credential Adapter.
#[derive(Debug, Error)]
pub enum ToolCredentialError {
    #[error("`{tool}` credential missing or expired; run `{command}`")]
    ReauthRequired { tool: String, command: String },

    #[error("unsupported tool: {0}")]
    ToolUnsupported(String),

    #[error("failed to scrape token from subprocess output")]
    ScrapeFailed,

    #[error("vault error: {0}")]
    Vault(#[from] hokipoki_crypto::CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the Requester Flow / Provider Flow orchestration.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("relay rejected the connection: {0}")]
    RelayAuthFailed(String),

    #[error("relay connection lost: {0}")]
    RelayDisconnected(String),

    #[error("no providers available for tool `{tool}`")]
    MatchingExhausted { tool: String },

    #[error("requester already has an active task")]
    ActiveTaskExists,

    #[error("sandbox execution failed: {0}")]
    SandboxFailure(String),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityAgentError),

    #[error("tool credential error: {0}")]
    ToolCredential(#[from] ToolCredentialError),

    #[error("tunnel error: {0}")]
    Tunnel(#[from] hokipoki_daemon::error::TunnelError),

    #[error("git server error: {0}")]
    GitServer(#[from] hokipoki_daemon::error::GitServerError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] hokipoki_daemon::error::SandboxError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
