//! Backend REST client: the Marketplace Backend API collaborator named in
//! §6 (workspace membership, tunnel-config issuance, provider-tool
//! registry, task persistence). Every call carries `Authorization: Bearer
//! <JWT>`; advisory calls (profile, task logging) log and continue on
//! failure rather than aborting the flow.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use hokipoki_proto::{Task, TunnelConfig};

use crate::error::FlowError;

/// Thin `reqwest` wrapper over the Backend REST API.
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

/// `GET /api/profile` response.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    #[serde(rename = "workspaceId")]
    pub workspace_id: Option<String>,
    pub workspaces: Vec<Workspace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(rename = "isPersonal")]
    pub is_personal: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ProviderToolsResponse {
    tools: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RegisterToolsRequest<'a> {
    tools: &'a [String],
}

/// `GET /api/tasks/active` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveTasks {
    #[serde(rename = "hasActiveTasks")]
    pub has_active_tasks: bool,
    #[serde(rename = "activeTasks")]
    pub active_tasks: Vec<Task>,
}

/// Body of `POST /api/tasks`: an upsert of the task's backend-visible
/// record, distinct from the relay's own authoritative `Task`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskUpsert<'a> {
    pub id: &'a str,
    pub tool: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub description: &'a str,
    pub status: &'a str,
    pub credits: f64,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(rename = "providerId", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<&'a str>,
}

impl BackendClient {
    pub fn new(base_url: String, request_timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `GET /api/profile`. Advisory: callers that only need the active
    /// workspace id should treat a failure as "retry or prompt", not a hard
    /// abort.
    pub async fn profile(&self, access_token: &str) -> Result<Profile, FlowError> {
        let resp = self
            .http
            .get(self.url("/api/profile"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| FlowError::SandboxFailure(format!("profile fetch failed: {e}")))?;
        resp.json()
            .await
            .map_err(|e| FlowError::SandboxFailure(format!("profile response malformed: {e}")))
    }

    /// `GET /api/tunnel/token`.
    pub async fn tunnel_token(&self, access_token: &str) -> Result<TunnelConfig, FlowError> {
        let resp = self
            .http
            .get(self.url("/api/tunnel/token"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| FlowError::Tunnel(hokipoki_daemon::error::TunnelError::BinaryUnavailable(e.to_string())))?;
        resp.json()
            .await
            .map_err(|e| FlowError::Tunnel(hokipoki_daemon::error::TunnelError::BinaryUnavailable(e.to_string())))
    }

    /// `GET /api/provider/tools`.
    pub async fn registered_tools(&self, access_token: &str) -> Result<Vec<String>, FlowError> {
        let resp = self
            .http
            .get(self.url("/api/provider/tools"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| FlowError::SandboxFailure(format!("tool registry fetch failed: {e}")))?;
        let body: ProviderToolsResponse = resp
            .json()
            .await
            .map_err(|e| FlowError::SandboxFailure(format!("tool registry response malformed: {e}")))?;
        Ok(body.tools)
    }

    /// `POST /api/provider/tools`.
    pub async fn register_tools(&self, access_token: &str, tools: &[String]) -> Result<(), FlowError> {
        let resp = self
            .http
            .post(self.url("/api/provider/tools"))
            .bearer_auth(access_token)
            .json(&RegisterToolsRequest { tools })
            .send()
            .await
            .map_err(|e| FlowError::SandboxFailure(format!("tool registration failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(FlowError::SandboxFailure(format!(
                "tool registration returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// `GET /api/tasks/active`. Used to enforce the "one active task per
    /// requester" invariant before ever contacting the relay.
    pub async fn active_tasks(&self, access_token: &str) -> Result<ActiveTasks, FlowError> {
        let resp = self
            .http
            .get(self.url("/api/tasks/active"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| FlowError::SandboxFailure(format!("active-task check failed: {e}")))?;
        resp.json()
            .await
            .map_err(|e| FlowError::SandboxFailure(format!("active-task response malformed: {e}")))
    }

    /// `POST /api/tasks`: best-effort dashboard logging. Network errors are
    /// logged and swallowed — the task's lifecycle is authoritative on the
    /// relay, not here.
    pub async fn upsert_task(&self, access_token: &str, task: &TaskUpsert<'_>) {
        let result = self
            .http
            .post(self.url("/api/tasks"))
            .bearer_auth(access_token)
            .json(task)
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, task_id = task.id, "task dashboard logging failed, continuing");
        }
    }

    /// `PUT /api/tasks/{id}/provider`: best-effort.
    pub async fn bind_provider(&self, access_token: &str, task_id: &str, provider_id: &str) {
        let result = self
            .http
            .put(self.url(&format!("/api/tasks/{task_id}/provider")))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "providerId": provider_id }))
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, task_id, "provider-binding logging failed, continuing");
        }
    }

    /// `POST /api/tasks/{id}/cancel`: best-effort, bounded to a 3-second
    /// network timeout per the signal-handling cancellation policy (§5).
    pub async fn cancel_task(&self, access_token: &str, task_id: &str) {
        let result = self
            .http
            .post(self.url(&format!("/api/tasks/{task_id}/cancel")))
            .bearer_auth(access_token)
            .timeout(Duration::from_secs(3))
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, task_id, "best-effort cancel notification failed, continuing");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path_without_double_slash() {
        let client = BackendClient::new("https://api.hoki-poki.ai/".to_string(), 10);
        assert_eq!(client.url("/api/profile"), "https://api.hoki-poki.ai/api/profile");
    }

    #[test]
    fn task_upsert_omits_absent_optional_fields() {
        let upsert = TaskUpsert {
            id: "t1",
            tool: "claude",
            model: None,
            description: "fix it",
            status: "pending",
            credits: 1.0,
            created_at: 0,
            completed_at: None,
            provider_id: None,
            summary: None,
        };
        let json = serde_json::to_value(&upsert).unwrap();
        assert!(json.get("model").is_none());
        assert!(json.get("completedAt").is_none());
        assert!(json.get("providerId").is_none());
        assert!(json.get("summary").is_none());
    }
}
