//! Provider Flow (§4.9): register tool credentials -> connect and advertise
//! -> accept/decline incoming tasks -> receive git credentials -> run the
//! sandbox -> report the outcome -> acknowledge the requester's confirmation.

use tracing::{info, warn};

use hokipoki_core::unix_timestamp;
use hokipoki_daemon::sandbox::{SandboxEnv, SandboxExecutor, SandboxOutcome};
use hokipoki_proto::{Frame, P2pEnvelope, P2pPayload, Task, TaskStatus};

use crate::backend::BackendClient;
use crate::error::FlowError;
use crate::relay_client::{self, RelayConnection, ReconnectPolicy};
use crate::toolcred::{Tool, ToolCredentialStore};

/// Registers every locally-authenticated tool's availability with the
/// backend, so matching can route tasks to this provider. Callers that want
/// a specific subset should filter `creds.list_authenticated()` themselves
/// before calling `register_tools` directly; this is the all-in convenience
/// path the `provider register` subcommand uses.
pub async fn register(
    creds: &ToolCredentialStore,
    backend: &BackendClient,
    access_token: &str,
) -> Result<Vec<String>, FlowError> {
    let tools = creds.list_authenticated()?;
    backend.register_tools(access_token, &tools).await?;
    info!(?tools, "registered provider tools with the backend");
    Ok(tools)
}

/// Decide whether to accept an incoming task. The CLI's interactive prompt
/// and an unattended auto-accept policy both implement this trait so
/// `listen` doesn't care which one is wired in.
pub trait AcceptPolicy: Send + Sync {
    fn accept(&self, task: &Task) -> bool;
}

/// Accepts every offered task without prompting, for unattended hosts.
pub struct AutoAccept;
impl AcceptPolicy for AutoAccept {
    fn accept(&self, _task: &Task) -> bool {
        true
    }
}

pub struct ListenConfig {
    pub relay_url: String,
    pub access_token: String,
    pub runtime: hokipoki_daemon::sandbox::ContainerRuntime,
    pub image: String,
}

/// Open a relay session, advertise as a provider, and process tasks until
/// interrupted. One task runs to completion before the next is accepted —
/// per §5, a provider handles one task at a time.
pub async fn listen(
    config: ListenConfig,
    creds: &ToolCredentialStore,
    backend: &BackendClient,
    policy: &dyn AcceptPolicy,
) -> Result<(), FlowError> {
    let mut relay = relay_client::connect_with_backoff(&config.relay_url, &config.access_token, ReconnectPolicy::default()).await?;
    let tools = creds.list_authenticated()?;

    relay
        .send(&Frame::RegisterProvider {
            payload: hokipoki_proto::wire::RegisterProviderPayload {
                tools,
                workspace_ids: Vec::new(),
                user_id: relay.peer_id.clone(),
                token: config.access_token.clone(),
            },
        })
        .await?;

    let executor = SandboxExecutor::new(config.runtime, config.image.clone());

    loop {
        tokio::select! {
            frame = relay.recv() => {
                let Some(frame) = frame? else {
                    return Err(FlowError::RelayDisconnected("connection closed by relay".to_string()));
                };
                match frame {
                    Frame::NewTask { task } => {
                        handle_new_task(&mut relay, &executor, creds, backend, &config, task, policy).await?;
                    }
                    Frame::TaskCancelled { task_id, reason } => {
                        warn!(task_id, ?reason, "requester cancelled the task");
                        executor.cancel(&task_id).await;
                        backend.cancel_task(&config.access_token, &task_id).await;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("provider interrupted, disconnecting");
                relay.close().await;
                return Ok(());
            }
        }
    }
}

async fn handle_new_task(
    relay: &mut RelayConnection,
    executor: &SandboxExecutor,
    creds: &ToolCredentialStore,
    backend: &BackendClient,
    config: &ListenConfig,
    task: Task,
    policy: &dyn AcceptPolicy,
) -> Result<(), FlowError> {
    if !policy.accept(&task) {
        relay.send(&Frame::DeclineTask { task_id: task.id.clone() }).await?;
        return Ok(());
    }

    let tool = match Tool::parse(&task.tool) {
        Ok(t) => t,
        Err(_) => {
            relay.send(&Frame::DeclineTask { task_id: task.id.clone() }).await?;
            return Ok(());
        }
    };

    relay.send(&Frame::AcceptTask { task_id: task.id.clone() }).await?;

    let requester_id = loop {
        match relay.recv().await? {
            Some(Frame::TaskAccepted { task_id, requester_id }) if task_id == task.id => break requester_id,
            Some(Frame::TaskCancelled { task_id, .. }) if task_id == task.id => {
                info!(task_id, "requester cancelled before accept was confirmed");
                return Ok(());
            }
            Some(_) => continue,
            None => return Err(FlowError::RelayDisconnected("closed while awaiting task_accepted".to_string())),
        }
    };

    let git_credentials = loop {
        match relay.recv().await? {
            Some(Frame::P2pRelay { payload, .. }) => {
                if let P2pPayload::GitCredentials { git_url, git_token, tool: req_tool, model, task_description } = payload.payload {
                    break (git_url, git_token, req_tool, model, task_description);
                }
            }
            Some(Frame::TaskCancelled { task_id, .. }) if task_id == task.id => {
                info!(task_id, "requester cancelled before sending git credentials");
                return Ok(());
            }
            Some(_) => continue,
            None => return Err(FlowError::RelayDisconnected("closed while awaiting git_credentials".to_string())),
        }
    };
    let (git_url, git_token, _tool_name, model, task_description) = git_credentials;

    let credential = creds.credential_for(tool)?;
    let env = SandboxEnv {
        task_id: task.id.clone(),
        git_url,
        git_token,
        ai_tool: tool.name().to_string(),
        ai_model: model,
        task_description,
        oauth_token: credential.opaque_blob,
    };

    backend.bind_provider(&config.access_token, &task.id, &relay.peer_id).await;

    match executor.run(&env).await {
        Ok(SandboxOutcome::Completed { commit_summary }) => {
            relay
                .send(&Frame::P2pRelay {
                    from: relay.peer_id.clone(),
                    to: requester_id,
                    payload: P2pEnvelope {
                        payload: P2pPayload::ExecutionComplete { commit_summary },
                        timestamp: unix_timestamp(),
                    },
                })
                .await?;
        }
        Ok(SandboxOutcome::NoChanges) => {
            relay
                .send(&Frame::P2pRelay {
                    from: relay.peer_id.clone(),
                    to: requester_id,
                    payload: P2pEnvelope {
                        payload: P2pPayload::ExecutionFailed { reason: "no changes were produced".to_string() },
                        timestamp: unix_timestamp(),
                    },
                })
                .await?;
        }
        Err(e) => {
            warn!(task_id = task.id, error = %e, "sandbox execution failed");
            relay
                .send(&Frame::P2pRelay {
                    from: relay.peer_id.clone(),
                    to: requester_id,
                    payload: P2pEnvelope {
                        payload: P2pPayload::ExecutionFailed { reason: e.to_string() },
                        timestamp: unix_timestamp(),
                    },
                })
                .await?;
        }
    }

    await_confirmation(relay, &task.id).await
}

/// Wait for the requester's `confirmation` and reply with `confirmation_ack`.
/// §5 bounds this on the requester's side only; the provider waits
/// indefinitely since it has nothing else to do until the pair tears down.
async fn await_confirmation(relay: &mut RelayConnection, task_id: &str) -> Result<(), FlowError> {
    loop {
        match relay.recv().await? {
            Some(Frame::P2pRelay { from, payload, .. }) => {
                if let P2pPayload::Confirmation { task_id: confirmed_id, .. } = payload.payload {
                    if confirmed_id == task_id {
                        relay
                            .send(&Frame::P2pRelay {
                                from: relay.peer_id.clone(),
                                to: from,
                                payload: P2pEnvelope { payload: P2pPayload::ConfirmationAck, timestamp: unix_timestamp() },
                            })
                            .await?;
                        return Ok(());
                    }
                }
            }
            Some(Frame::TaskCancelled { task_id: cancelled_id, .. }) if cancelled_id == task_id => return Ok(()),
            Some(_) => continue,
            None => return Err(FlowError::RelayDisconnected("closed while awaiting confirmation".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverAccept;
    impl AcceptPolicy for NeverAccept {
        fn accept(&self, _task: &Task) -> bool {
            false
        }
    }

    #[test]
    fn auto_accept_always_returns_true() {
        let task = Task {
            id: "t1".to_string(),
            requester_id: "r1".to_string(),
            tool: "claude".to_string(),
            model: None,
            description: "fix it".to_string(),
            workspace_id: "ws1".to_string(),
            credits: 2,
            status: TaskStatus::Pending,
            created_at: 0,
            provider_id: None,
            completed_at: None,
            commit_summary: None,
        };
        assert!(AutoAccept.accept(&task));
        assert!(!NeverAccept.accept(&task));
    }
}
