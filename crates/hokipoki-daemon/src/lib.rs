//! HokiPoki Daemon Library
//!
//! The host-local execution substrate shared by both requester and provider
//! processes:
//! - Tunnel Client: locate/download the reverse-tunnel binary, open and tear
//!   down named tunnels.
//! - Ephemeral Git Server: transient bare repo, authenticated git smart-HTTP
//!   service, tunnel attachment, diff extraction.
//! - Sandbox Executor: encrypted-workspace container execution, credential
//!   injection, commit-summary capture, secure teardown.

pub mod error;
pub mod gitserver;
pub mod procutil;
pub mod sandbox;
pub mod tunnel;

pub use error::{GitServerError, SandboxError, TunnelError};
pub use gitserver::{EphemeralGitServer, GitServerConfig};
pub use sandbox::{ContainerRuntime, SandboxEnv, SandboxExecutor, SandboxOutcome};
pub use tunnel::TunnelHandle;
