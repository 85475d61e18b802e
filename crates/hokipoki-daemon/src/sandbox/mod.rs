//! Sandbox Executor: builds/reuses a container image with the AI CLI
//! binaries, runs one task's execution inside an encrypted tmpfs workspace,
//! and captures the resulting commit summary.
//!
//! The host side shells out to `docker`/`podman` exactly as the Tunnel
//! Client shells out to the tunnel binary: piped stdio drained concurrently
//! into a bounded buffer, a wall-clock timeout wrapping `.wait()`, and a
//! two-phase SIGINT-then-SIGKILL teardown on cancellation.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::SandboxError;
use crate::procutil::{BoundedOutput, piped_command, terminate_two_phase};

/// The in-container entrypoint script, generated once and shared by every
/// invocation of the container runtime.
const ENTRYPOINT_SCRIPT: &str = include_str!("scripts/entrypoint.sh");

const WALL_CLOCK_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const OUTPUT_CAP_BYTES: usize = 10 * 1024 * 1024;
const MEMORY_LIMIT: &str = "1g";
const PIDS_LIMIT: &str = "200";
const WORKSPACE_TMPFS: &str = "size=300m,mode=0755";
const TMP_TMPFS: &str = "size=50m,mode=1777";

const COMMIT_MESSAGE_START: &str = "[HOKIPOKI_COMMIT_MESSAGE]";
const COMMIT_MESSAGE_END: &str = "[/HOKIPOKI_COMMIT_MESSAGE]";

/// Per-task environment the host passes into the container.
#[derive(Clone)]
pub struct SandboxEnv {
    pub task_id: String,
    pub git_url: String,
    pub git_token: String,
    pub ai_tool: String,
    pub ai_model: Option<String>,
    pub task_description: String,
    pub oauth_token: String,
}

impl std::fmt::Debug for SandboxEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxEnv")
            .field("task_id", &self.task_id)
            .field("git_url", &self.git_url)
            .field("git_token", &"[REDACTED]")
            .field("ai_tool", &self.ai_tool)
            .field("ai_model", &self.ai_model)
            .field("task_description", &self.task_description)
            .field("oauth_token", &"[REDACTED]")
            .finish()
    }
}

/// Outcome of a completed (or failed) sandbox run.
#[derive(Debug)]
pub enum SandboxOutcome {
    /// The container produced and pushed a commit.
    Completed { commit_summary: String },
    /// The working tree was clean; nothing to push.
    NoChanges,
}

/// Runs one task's sandboxed AI CLI execution. One `SandboxExecutor` handles
/// one task; a new instance is created per task.
pub struct SandboxExecutor {
    runtime: ContainerRuntime,
    image: String,
}

/// Which container CLI to shell out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    fn binary(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl SandboxExecutor {
    pub fn new(runtime: ContainerRuntime, image: impl Into<String>) -> Self {
        Self {
            runtime,
            image: image.into(),
        }
    }

    fn container_name(task_id: &str) -> String {
        format!("hokipoki-{task_id}")
    }

    /// Run the task end-to-end: spawn the container with the privileges and
    /// mounts required for LUKS-on-loop, stream its entrypoint script via
    /// stdin, and wait (bounded by the 20-minute wall clock) for it to
    /// finish.
    pub async fn run(&self, env: &SandboxEnv) -> Result<SandboxOutcome, SandboxError> {
        let name = Self::container_name(&env.task_id);
        info!(task_id = %env.task_id, container = %name, "starting sandbox execution");

        let mut cmd = piped_command(self.runtime.binary());
        cmd.arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(&name)
            .arg("--cap-drop")
            .arg("ALL")
            .arg("--cap-add")
            .arg("SYS_ADMIN")
            .arg("--cap-add")
            .arg("MKNOD")
            .arg("--device-cgroup-rule")
            .arg("b 7:* rmw")
            .arg("--device-cgroup-rule")
            .arg("b 10:* rmw")
            .arg("--memory")
            .arg(MEMORY_LIMIT)
            .arg("--memory-swap")
            .arg(MEMORY_LIMIT)
            .arg("--pids-limit")
            .arg(PIDS_LIMIT)
            .arg("--tmpfs")
            .arg(format!("/workspace:{WORKSPACE_TMPFS}"))
            .arg("--tmpfs")
            .arg(format!("/tmp:{TMP_TMPFS}"));

        if let Some(subdomain) = tunnel_subdomain(&env.git_url) {
            // The container's DNS otherwise has no route to the requester's
            // tunnel subdomain; map it to the host gateway so cloning
            // `GIT_URL` resolves back to the host's tunnel endpoint.
            cmd.arg("--add-host").arg(format!("{subdomain}:host-gateway"));
        } else {
            warn!(task_id = %env.task_id, git_url = %env.git_url, "could not derive tunnel host from git url, skipping host-gateway mapping");
        }

        cmd.arg("-e")
            .arg(format!("TASK_ID={}", env.task_id))
            .arg("-e")
            .arg(format!("GIT_URL={}", env.git_url))
            .arg("-e")
            .arg(format!("GIT_TOKEN={}", env.git_token))
            .arg("-e")
            .arg(format!("AI_TOOL={}", env.ai_tool))
            .arg("-e")
            .arg(format!("TASK_DESCRIPTION={}", env.task_description))
            .arg("-e")
            .arg(format!("OAUTH_TOKEN={}", env.oauth_token));

        if let Some(model) = &env.ai_model {
            cmd.arg("-e").arg(format!("AI_MODEL={model}"));
        }

        cmd.arg("-i").arg(&self.image).arg("sh").arg("-s");

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::ContainerSpawnFailed(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin
                .write_all(ENTRYPOINT_SCRIPT.as_bytes())
                .await
                .map_err(|e| SandboxError::ContainerSpawnFailed(e.to_string()))?;
            drop(stdin);
        }

        let output = BoundedOutput::new(OUTPUT_CAP_BYTES);
        output.drain(&mut child, "sandbox");

        let wait_result = tokio::time::timeout(WALL_CLOCK_TIMEOUT, child.wait()).await;
        let status = match wait_result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(SandboxError::ContainerSpawnFailed(e.to_string())),
            Err(_) => {
                warn!(task_id = %env.task_id, "sandbox exceeded wall clock, terminating");
                terminate_two_phase(&mut child, Duration::from_secs(10)).await;
                self.force_remove(&name).await;
                return Err(SandboxError::Timeout(WALL_CLOCK_TIMEOUT.as_secs()));
            }
        };

        let captured = output.snapshot().await;
        if captured.contains("401 Unauthorized") {
            warn!(task_id = %env.task_id, "sandbox output indicates an expired credential");
        }

        self.force_remove(&name).await;

        if !status.success() {
            return Err(SandboxError::NonZeroExit(status.code().unwrap_or(-1)));
        }

        match extract_commit_summary(&captured) {
            Some(summary) => Ok(SandboxOutcome::Completed {
                commit_summary: summary,
            }),
            None => Ok(SandboxOutcome::NoChanges),
        }
    }

    /// Kill a running container by task-derived name, e.g. on a
    /// `task_cancelled` frame. Best-effort.
    pub async fn cancel(&self, task_id: &str) {
        let name = Self::container_name(task_id);
        info!(task_id, container = %name, "cancelling sandbox execution");
        self.force_remove(&name).await;
    }

    async fn force_remove(&self, container_name: &str) {
        let status = tokio::process::Command::new(self.runtime.binary())
            .arg("rm")
            .arg("-f")
            .arg(container_name)
            .status()
            .await;
        if let Err(e) = status {
            warn!(container = %container_name, error = %e, "failed to force-remove container");
        }
    }
}

/// Pull the commit message out of the sentinel-bracketed block emitted by
/// the in-container script, if present.
fn extract_commit_summary(output: &str) -> Option<String> {
    let start = output.find(COMMIT_MESSAGE_START)? + COMMIT_MESSAGE_START.len();
    let end = output[start..].find(COMMIT_MESSAGE_END)? + start;
    Some(output[start..end].to_string())
}

/// The requester's tunnel subdomain the container needs `--add-host` for,
/// taken from `GIT_URL`'s host -- the public URL the provider was handed
/// already points at the tunnel, so its host *is* the subdomain.
fn tunnel_subdomain(git_url: &str) -> Option<String> {
    reqwest::Url::parse(git_url).ok()?.host_str().map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extracts_commit_summary_from_sentinel_block() {
        let output = "some log line\n[HOKIPOKI_COMMIT_MESSAGE]HokiPoki claude: fixed the typo[/HOKIPOKI_COMMIT_MESSAGE]\nmore log\n";
        let summary = extract_commit_summary(output).unwrap();
        assert_eq!(summary, "HokiPoki claude: fixed the typo");
    }

    #[test]
    fn returns_none_without_sentinel() {
        assert!(extract_commit_summary("nothing here").is_none());
    }

    #[test]
    fn tunnel_subdomain_extracts_host_from_git_url() {
        assert_eq!(
            tunnel_subdomain("https://swift-otter-42.hoki-poki.ai/task-1.git"),
            Some("swift-otter-42.hoki-poki.ai".to_string())
        );
    }

    #[test]
    fn tunnel_subdomain_is_none_for_unparseable_url() {
        assert_eq!(tunnel_subdomain("not a url"), None);
    }

    #[test]
    fn container_name_is_prefixed_for_cancellation_lookup() {
        assert_eq!(
            SandboxExecutor::container_name("task-42"),
            "hokipoki-task-42"
        );
    }

    #[test]
    fn sandbox_env_debug_redacts_secrets() {
        let env = SandboxEnv {
            task_id: "t1".to_string(),
            git_url: "http://example/repo.git".to_string(),
            git_token: "supersecrettoken".to_string(),
            ai_tool: "claude".to_string(),
            ai_model: None,
            task_description: "fix it".to_string(),
            oauth_token: "sk-ant-oat01-xxxxx".to_string(),
        };
        let out = format!("{env:?}");
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("supersecrettoken"));
        assert!(!out.contains("sk-ant-oat01-xxxxx"));
    }
}
