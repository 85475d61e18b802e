//! Requester Flow (§4.8): publish -> match -> tunnel -> credentials ->
//! await-completion -> fetch-diff -> apply -> confirm.
//!
//! Driven by `tokio::select!` over the relay's receive stream and
//! `tokio::signal::ctrl_c`, the same shape as the daemon's tunnel-loop
//! inner loop generalized from a tunnel-control stream to the Relay
//! Protocol's frames.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use hokipoki_core::unix_timestamp;
use hokipoki_daemon::gitserver::EphemeralGitServer;
use hokipoki_daemon::tunnel;
use hokipoki_proto::{Frame, P2pEnvelope, P2pPayload};

use crate::backend::BackendClient;
use crate::error::FlowError;
use crate::relay_client::{self, RelayConnection, ReconnectPolicy};

/// Hard timeout for `confirmation_ack` before tearing down anyway, per §5.
const CONFIRMATION_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the Requester Flow needs to drive a single task end to end.
pub struct RequesterFlowConfig {
    pub relay_url: String,
    pub access_token: String,
    pub user_id: String,
    pub workspace_id: String,
    pub tool: String,
    pub model: Option<String>,
    pub task: String,
    pub files: Vec<(PathBuf, Vec<u8>)>,
    pub credits: u32,
    pub tmp_root: PathBuf,
    pub tunnel_bin_dir: PathBuf,
    pub tunnel_config_dir: PathBuf,
    pub tunnel: hokipoki_core::config::TunnelSettings,
    pub auto_apply: bool,
}

/// Process exit code for a completed flow, per §6/§7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    Interrupted = 130,
}

/// Run the full Requester Flow. Returns the exit code the binary should use.
pub async fn run(
    config: RequesterFlowConfig,
    backend: &BackendClient,
) -> Result<ExitCode, FlowError> {
    if backend.active_tasks(&config.access_token).await?.has_active_tasks {
        return Err(FlowError::ActiveTaskExists);
    }

    let mut relay = relay_client::connect_with_backoff(&config.relay_url, &config.access_token, ReconnectPolicy::default()).await?;
    relay
        .send(&Frame::RegisterRequester {
            payload: hokipoki_proto::wire::RegisterRequesterPayload {
                workspace_id: config.workspace_id.clone(),
                user_id: config.user_id.clone(),
            },
        })
        .await?;

    relay
        .send(&Frame::PublishTask {
            payload: hokipoki_proto::wire::PublishTaskPayload {
                tool: config.tool.clone(),
                model: config.model.clone(),
                task: config.task.clone(),
                description: config.task.clone(),
                estimated_duration: 0,
                credits: config.credits,
                workspace_id: config.workspace_id.clone(),
            },
        })
        .await?;

    let outcome = drive(&mut relay, &config, backend).await;
    relay.close().await;
    outcome
}

async fn drive(
    relay: &mut RelayConnection,
    config: &RequesterFlowConfig,
    backend: &BackendClient,
) -> Result<ExitCode, FlowError> {
    let mut task_id: Option<String> = None;
    let mut provider_id: Option<String> = None;
    let mut git_server: Option<EphemeralGitServer> = None;

    loop {
        tokio::select! {
            frame = relay.recv() => {
                let Some(frame) = frame? else {
                    return Err(FlowError::RelayDisconnected("connection closed by relay".to_string()));
                };
                match frame {
                    Frame::TaskPublished { task_id: id } => {
                        info!(task_id = %id, "task published, awaiting a match");
                        task_id = Some(id);
                    }
                    Frame::NoProvidersAvailable { tool, .. } => {
                        warn!(tool, "no providers available");
                        return Ok(ExitCode::Failure);
                    }
                    Frame::TaskMatched { task_id: id, provider_id: matched_provider } => {
                        info!(task_id = %id, provider_id = %matched_provider, "matched with a provider");
                        let server = stand_up_git_server(config, &id).await?;
                        send_git_credentials(relay, config, &id, &matched_provider, &server).await?;
                        git_server = Some(server);
                        provider_id = Some(matched_provider);
                    }
                    Frame::P2pRelay { payload, .. } => {
                        let P2pEnvelope { payload, .. } = payload;
                        match payload {
                            P2pPayload::ExecutionComplete { commit_summary } => {
                                let Some(id) = task_id.clone() else { continue };
                                let Some(server) = git_server.take() else { continue };
                                let Some(provider) = provider_id.clone() else { continue };
                                info!(task_id = %id, %commit_summary, "provider pushed a commit");
                                let code = finish_success(relay, backend, config, &id, &provider, server).await?;
                                return Ok(code);
                            }
                            P2pPayload::ExecutionFailed { reason } => {
                                warn!(reason, "provider reported execution failure");
                                if let Some(server) = git_server.take() {
                                    server.stop().await;
                                }
                                return Ok(ExitCode::Failure);
                            }
                            P2pPayload::Error { message } => {
                                warn!(message, "provider reported a recoverable error");
                            }
                            _ => {}
                        }
                    }
                    Frame::TaskCancelled { reason, .. } => {
                        warn!(?reason, "task was cancelled");
                        if let Some(server) = git_server.take() {
                            server.stop().await;
                        }
                        return Ok(ExitCode::Failure);
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling task");
                if let Some(id) = &task_id {
                    let _ = relay.send(&Frame::CancelTask { task_id: id.clone(), reason: Some("interrupted".to_string()) }).await;
                    backend.cancel_task(&config.access_token, id).await;
                }
                if let Some(server) = git_server.take() {
                    server.stop().await;
                }
                return Ok(ExitCode::Interrupted);
            }
        }
    }
}

async fn stand_up_git_server(config: &RequesterFlowConfig, task_id: &str) -> Result<EphemeralGitServer, FlowError> {
    let mut server = EphemeralGitServer::initialize(task_id, &config.tmp_root, &config.files).await?;

    let tunnel_binary = tunnel::ensure_binary(&config.tunnel_bin_dir).await?;
    let server_addr = config.tunnel.frp_server_addr.clone().unwrap_or_else(|| "127.0.0.1".to_string());
    let server_port = config.tunnel.frp_server_port.unwrap_or(7000);
    let subdomain_host = config.tunnel.frp_tunnel_domain.clone().unwrap_or_else(|| "hoki-poki.ai".to_string());
    // Deliberately not part of `Config`: read directly from the environment
    // at spawn time so it never round-trips through a struct that gets
    // logged or serialized back to disk.
    let shared_secret = std::env::var("FRP_AUTH_TOKEN").unwrap_or_default();

    server
        .start(&tunnel_binary, &config.tunnel_config_dir, &server_addr, server_port, &shared_secret, &subdomain_host)
        .await?;
    Ok(server)
}

async fn send_git_credentials(
    relay: &mut RelayConnection,
    config: &RequesterFlowConfig,
    task_id: &str,
    provider_id: &str,
    server: &EphemeralGitServer,
) -> Result<(), FlowError> {
    let Some(git_config) = server.get_config() else {
        return Err(FlowError::SandboxFailure("ephemeral git server has no public url yet".to_string()));
    };

    let payload = P2pPayload::GitCredentials {
        git_url: git_config.url,
        git_token: git_config.bearer,
        tool: config.tool.clone(),
        model: config.model.clone(),
        task_description: config.task.clone(),
    };
    relay
        .send(&Frame::P2pRelay {
            from: relay.peer_id.clone(),
            to: provider_id.to_string(),
            payload: P2pEnvelope { payload, timestamp: unix_timestamp() },
        })
        .await?;
    info!(task_id, provider_id, "sent git credentials to provider");
    Ok(())
}

async fn finish_success(
    relay: &mut RelayConnection,
    backend: &BackendClient,
    config: &RequesterFlowConfig,
    task_id: &str,
    provider_id: &str,
    server: EphemeralGitServer,
) -> Result<ExitCode, FlowError> {
    let diff = server.get_changes().await?;
    let split = super::patch::split_diff(&diff);

    if let Some(review) = &split.ai_review {
        info!(task_id, "AI review:\n{review}");
    }

    let mut accepted = true;
    if let Some(code_changes) = &split.code_changes {
        let cwd = std::env::current_dir()?;
        super::patch::materialize_new_files(&cwd, code_changes).await?;

        if config.auto_apply {
            let now = unix_timestamp();
            let patch_path = super::patch::save_patch(task_id, now, code_changes).await?;
            match super::patch::try_apply(&cwd, &patch_path).await? {
                super::patch::ApplyOutcome::Applied => {
                    tokio::fs::remove_file(&patch_path).await.ok();
                    info!(task_id, "patch auto-applied");
                }
                super::patch::ApplyOutcome::Conflict => {
                    warn!(task_id, patch = %patch_path.display(), "patch conflict, saved for manual apply");
                    // Per §7 PatchConflict policy: provider is still paid.
                    accepted = true;
                }
            }
        }
    }

    server.stop().await;

    send_confirmation_and_await_ack(relay, task_id, provider_id, accepted).await?;
    backend
        .upsert_task(
            &config.access_token,
            &crate::backend::TaskUpsert {
                id: task_id,
                tool: &config.tool,
                model: config.model.as_deref(),
                description: &config.task,
                status: "completed",
                credits: 2.5,
                created_at: unix_timestamp(),
                completed_at: Some(unix_timestamp()),
                provider_id: None,
                summary: None,
            },
        )
        .await;

    Ok(ExitCode::Success)
}

async fn send_confirmation_and_await_ack(
    relay: &mut RelayConnection,
    task_id: &str,
    provider_id: &str,
    accepted: bool,
) -> Result<(), FlowError> {
    relay
        .send(&Frame::P2pRelay {
            from: relay.peer_id.clone(),
            to: provider_id.to_string(),
            payload: P2pEnvelope {
                payload: P2pPayload::Confirmation { accepted, credits: 2.5, task_id: task_id.to_string() },
                timestamp: unix_timestamp(),
            },
        })
        .await?;

    let wait = tokio::time::timeout(CONFIRMATION_ACK_TIMEOUT, async {
        loop {
            match relay.recv().await {
                Ok(Some(Frame::P2pRelay { payload, .. })) => {
                    if matches!(payload.payload, P2pPayload::ConfirmationAck) {
                        return Ok(());
                    }
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Err(FlowError::RelayDisconnected("closed while awaiting ack".to_string())),
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match wait {
        Ok(result) => result,
        Err(_) => {
            warn!(task_id, "confirmation_ack timed out after 5s, tearing down anyway");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_variants_are_distinct() {
        assert_ne!(ExitCode::Success as i32, ExitCode::Failure as i32);
        assert_ne!(ExitCode::Failure as i32, ExitCode::Interrupted as i32);
        assert_eq!(ExitCode::Interrupted as i32, 130);
    }
}
