//! Error types for the daemon's three components.

use thiserror::Error;

/// Errors from the Tunnel Client.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to locate or download tunnel binary: {0}")]
    BinaryUnavailable(String),

    #[error("failed to spawn tunnel process: {0}")]
    SpawnFailed(String),

    #[error("tunnel exited before reporting a public URL")]
    ExitedEarly,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the Ephemeral Git Server.
#[derive(Debug, Error)]
pub enum GitServerError {
    #[error("git subprocess failed: {0}")]
    GitCommandFailed(String),

    #[error("failed to bind git server listener: {0}")]
    BindFailed(String),

    #[error("unauthorized request to git server")]
    Unauthorized,

    #[error("task repository not found: {0}")]
    RepoNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the Sandbox Executor.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to provision encrypted volume: {0}")]
    VolumeProvisioningFailed(String),

    #[error("container runtime failed to start: {0}")]
    ContainerSpawnFailed(String),

    #[error("execution exceeded the {0}s wall-clock timeout")]
    Timeout(u64),

    #[error("container exited with non-zero status: {0}")]
    NonZeroExit(i32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
