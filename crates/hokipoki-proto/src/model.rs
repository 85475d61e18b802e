//! Data-model entities shared across the relay, daemon, and CLI.

use serde::{Deserialize, Serialize};

/// A sealed OIDC token set, as cached by the Identity Agent in the Token
/// Vault. `expiresAt` is a Unix timestamp (seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityToken {
    pub access: String,
    pub refresh: String,
    #[serde(rename = "idToken", skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

/// A Tool-Credential Adapter's view of a single AI CLI's stored credential.
///
/// `opaque_blob` is transported verbatim and must never be logged in
/// cleartext; it is the native tool's own credential file content, itself
/// JSON-encoded once more so it survives re-serialization when injected into
/// the sandbox as an environment variable.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolCredential {
    pub tool: String,
    #[serde(rename = "opaqueBlob")]
    pub opaque_blob: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

impl std::fmt::Debug for ToolCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCredential")
            .field("tool", &self.tool)
            .field("opaque_blob", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Cached Tunnel Client configuration, refreshed from the backend at most
/// once per 24h.
#[derive(Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub token: String,
    #[serde(rename = "serverAddr")]
    pub server_addr: String,
    #[serde(rename = "serverPort")]
    pub server_port: u16,
    #[serde(rename = "subdomainHost")]
    pub subdomain_host: String,
    #[serde(rename = "publicHttpPort")]
    pub public_http_port: u16,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: i64,
}

impl std::fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("token", &"[REDACTED]")
            .field("server_addr", &self.server_addr)
            .field("server_port", &self.server_port)
            .field("subdomain_host", &self.subdomain_host)
            .field("public_http_port", &self.public_http_port)
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

impl TunnelConfig {
    /// Cached config is valid for 24 hours.
    pub const MAX_AGE_SECS: i64 = 24 * 60 * 60;

    pub fn is_stale(&self, now: i64) -> bool {
        now - self.fetched_at >= Self::MAX_AGE_SECS
    }
}

/// The role a connected peer registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Requester,
    Provider,
}

/// A relay-owned record of a single connected socket, created on successful
/// authentication and destroyed on socket close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub role: PeerRole,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "workspaceIds")]
    pub workspace_ids: Vec<String>,
}

/// Lifecycle states of a `Task`.
///
/// `pending -> offered(provider) -> (accepted|declined -> re-offer)+ ->
/// accepted -> in_progress -> (completed|failed|cancelled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Offered,
    Accepted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// The relay's authoritative record of a published task. The relay is the
/// only mutator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "requesterId")]
    pub requester_id: String,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub description: String,
    #[serde(rename = "workspaceId")]
    pub workspace_id: String,
    pub credits: u32,
    pub status: TaskStatus,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "providerId", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(rename = "commitSummary", skip_serializing_if = "Option::is_none")]
    pub commit_summary: Option<String>,
}

/// The requester-owned ephemeral bare-repo + tunnel bundle for one task.
/// Exists only on the requester host and is shredded on teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralRepo {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "tempPath")]
    pub temp_path: std::path::PathBuf,
    #[serde(rename = "oneTimeBearer")]
    pub one_time_bearer: String,
    #[serde(rename = "listenPort")]
    pub listen_port: u16,
    #[serde(rename = "tunnelHandle", skip_serializing_if = "Option::is_none")]
    pub tunnel_handle: Option<String>,
}

/// The provider-owned sandbox execution record for one task. `luks_key` is
/// volatile: it exists only in this process's address space and the
/// device-mapper layer, and must be zeroed (and the image overwritten)
/// before the container exits.
#[derive(Clone, Serialize, Deserialize)]
pub struct SandboxSession {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "containerName")]
    pub container_name: String,
    #[serde(rename = "luksKey")]
    pub luks_key: Vec<u8>,
    #[serde(rename = "mountPoint")]
    pub mount_point: std::path::PathBuf,
}

impl std::fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSession")
            .field("task_id", &self.task_id)
            .field("container_name", &self.container_name)
            .field("luks_key", &"[REDACTED]")
            .field("mount_point", &self.mount_point)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tool_credential_debug_redacts_blob() {
        let cred = ToolCredential {
            tool: "claude".to_string(),
            opaque_blob: "sk-ant-oat01-super-secret".to_string(),
            expires_at: 0,
        };
        let out = format!("{cred:?}");
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("sk-ant-oat01-super-secret"));
    }

    #[test]
    fn tunnel_config_is_stale_after_24h() {
        let cfg = TunnelConfig {
            token: "t".to_string(),
            server_addr: "relay.example".to_string(),
            server_port: 7000,
            subdomain_host: "hoki-poki.ai".to_string(),
            public_http_port: 80,
            fetched_at: 0,
        };
        assert!(!cfg.is_stale(60));
        assert!(cfg.is_stale(24 * 60 * 60));
    }

    #[test]
    fn peer_role_serializes_snake_case() {
        let json = serde_json::to_string(&PeerRole::Provider).unwrap();
        assert_eq!(json, "\"provider\"");
    }

    #[test]
    fn task_status_roundtrips() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Offered,
            TaskStatus::Accepted,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let back: TaskStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
    }
}
