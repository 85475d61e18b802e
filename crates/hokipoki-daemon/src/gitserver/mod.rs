//! Ephemeral Git Server: a transient bare repo exposed over authenticated
//! git smart-HTTP, reachable through a reverse tunnel.
//!
//! Lifecycle: `initialize(files)` -> `start()` -> `get_config()` /
//! `get_changes()` -> `stop()`. The bare repo and bearer token exist only on
//! the requester host and are shredded on teardown.

pub mod cgi;
pub mod repo;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::routing::any;
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::GitServerError;
use crate::tunnel::TunnelHandle;
use cgi::CgiState;

/// Minimum bearer length in bytes, per the data-model invariant
/// (`|bearer| >= 256 bits`).
const BEARER_BYTES: usize = 32;

/// The requester-owned git server for a single task.
pub struct EphemeralGitServer {
    task_id: String,
    tmp_dir: PathBuf,
    bare_path: PathBuf,
    bearer: String,
    listen_addr: Option<SocketAddr>,
    http_task: Option<JoinHandle<()>>,
    tunnel: Option<TunnelHandle>,
    public_url: Option<String>,
}

/// Connection details handed to the provider over the P2P relay channel.
#[derive(Debug, Clone)]
pub struct GitServerConfig {
    pub url: String,
    pub bearer: String,
}

impl EphemeralGitServer {
    /// Materialize the bare repo and populate its initial work tree.
    /// `files` is `(path relative to the requester's cwd, content)` pairs;
    /// an empty slice synthesizes a placeholder file as a testing affordance.
    pub async fn initialize(
        task_id: &str,
        tmp_root: &std::path::Path,
        files: &[(PathBuf, Vec<u8>)],
    ) -> Result<Self, GitServerError> {
        let bare_path = repo::initialize(tmp_root, task_id, files).await?;
        let bearer = random_bearer();

        Ok(Self {
            task_id: task_id.to_string(),
            tmp_dir: tmp_root.to_path_buf(),
            bare_path,
            bearer,
            listen_addr: None,
            http_task: None,
            tunnel: None,
            public_url: None,
        })
    }

    /// Bind the loopback HTTP listener on a free port and attach a reverse
    /// tunnel, forming the public clone URL `<publicUrl>/<taskId>.git`.
    pub async fn start(
        &mut self,
        tunnel_binary: &std::path::Path,
        tunnel_config_dir: &std::path::Path,
        server_addr: &str,
        server_port: u16,
        shared_secret: &str,
        subdomain_host: &str,
    ) -> Result<(), GitServerError> {
        let listener = TcpListener::bind("0.0.0.0:0")
            .await
            .map_err(|e| GitServerError::BindFailed(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| GitServerError::BindFailed(e.to_string()))?;

        let state = CgiState {
            project_root: self.tmp_dir.clone(),
            bearer_token: self.bearer.clone(),
        };
        let app = Router::new().fallback(any(cgi::handle)).with_state(state);

        let task_id = self.task_id.clone();
        let http_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(task_id, error = %e, "ephemeral git server stopped unexpectedly");
            }
        });

        let tunnel = crate::tunnel::open_tunnel(
            tunnel_binary,
            tunnel_config_dir,
            server_addr,
            server_port,
            shared_secret,
            subdomain_host,
            local_addr.port(),
            None,
        )
        .await
        .map_err(|e| GitServerError::BindFailed(e.to_string()))?;

        self.public_url = Some(format!("{}/{}.git", tunnel.public_url(), self.task_id));
        self.listen_addr = Some(local_addr);
        self.http_task = Some(http_task);
        self.tunnel = Some(tunnel);

        info!(task_id = %self.task_id, url = ?self.public_url, "ephemeral git server started");
        Ok(())
    }

    /// The bundle sent to the provider over the P2P relay channel.
    pub fn get_config(&self) -> Option<GitServerConfig> {
        self.public_url.as_ref().map(|url| GitServerConfig {
            url: url.clone(),
            bearer: self.bearer.clone(),
        })
    }

    /// Clone the bare repo into a throwaway work tree and return the unified
    /// diff produced by the provider's commit(s).
    pub async fn get_changes(&self) -> Result<String, GitServerError> {
        repo::get_changes(&self.bare_path, &self.tmp_dir).await
    }

    /// Tear down the tunnel, stop the HTTP server, shred every file in the
    /// repo tree, and remove the directory. Best-effort and idempotent.
    pub async fn stop(mut self) {
        if let Some(tunnel) = self.tunnel.take() {
            tunnel.close().await;
        }
        if let Some(task) = self.http_task.take() {
            task.abort();
        }
        if let Err(e) = repo::shred(&self.bare_path).await {
            tracing::warn!(task_id = %self.task_id, error = %e, "failed to shred ephemeral repo");
        }
        let worktree = self.tmp_dir.join(format!("{}-worktree", self.task_id));
        repo::shred(&worktree).await.ok();
    }
}

fn random_bearer() -> String {
    let mut bytes = [0u8; BEARER_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_produces_a_long_random_bearer() {
        let tmp = tempfile::tempdir().unwrap();
        let server = EphemeralGitServer::initialize("task-x", tmp.path(), &[])
            .await
            .unwrap();
        assert!(server.bearer.len() >= BEARER_BYTES * 2 / 2); // hex-encoded
        assert_eq!(server.bearer.len(), BEARER_BYTES * 2);
    }

    #[test]
    fn random_bearer_is_unique_across_calls() {
        let a = random_bearer();
        let b = random_bearer();
        assert_ne!(a, b);
        assert_eq!(a.len(), BEARER_BYTES * 2);
    }
}
