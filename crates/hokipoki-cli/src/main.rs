//! `hokipoki` — the Requester/Provider CLI binary.
//!
//! Subcommands: `auth login/logout/status`, `provider register/listen`,
//! `request <task>`. Mirrors the teacher's one-subcommand-per-concern
//! layout, collapsed here into a single `main.rs` since each subcommand is
//! a thin wiring of one already-built collaborator.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use hokipoki_cli::backend::BackendClient;
use hokipoki_cli::flows::provider::{self, AutoAccept, ListenConfig};
use hokipoki_cli::flows::requester::{self, RequesterFlowConfig};
use hokipoki_cli::identity::IdentityAgent;
use hokipoki_cli::toolcred::{Tool, ToolCredentialStore};
use hokipoki_core::config::load_config;

#[derive(Parser)]
#[command(name = "hokipoki", version, about = "Run coding tasks on a peer's machine, or offer your own")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Identity Agent: OIDC login/logout against the configured issuer.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// Provider-side: register AI-tool credentials and listen for tasks.
    Provider {
        #[command(subcommand)]
        action: ProviderAction,
    },
    /// Requester-side: publish a task and drive it to completion.
    Request {
        /// Task description handed to the provider's AI tool.
        task: String,
        /// AI tool to run the task with (claude, codex, gemini).
        #[arg(long, default_value = "claude")]
        tool: String,
        /// Specific model to request, if the tool supports one.
        #[arg(long)]
        model: Option<String>,
        /// Credits offered for this task.
        #[arg(long, default_value_t = 1)]
        credits: u32,
        /// Apply the resulting patch automatically instead of leaving it on disk.
        #[arg(long)]
        auto_apply: bool,
        /// Files to seed the ephemeral repository with.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Open a browser and complete the authorization-code+PKCE flow.
    Login,
    /// Clear the cached identity token and tunnel-config cache.
    Logout,
    /// Print whether a cached, unexpired identity token exists.
    Status,
}

#[derive(Subcommand)]
enum ProviderAction {
    /// Authenticate every locally-installed AI CLI and register them with the backend.
    Register,
    /// Connect to the relay, advertise registered tools, and process tasks until interrupted.
    Listen {
        #[arg(long, default_value = "docker")]
        runtime: String,
        #[arg(long, default_value = "hokipoki/sandbox:latest")]
        image: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    hokipoki_core::init_tracing("hokipoki=info", false);

    let cli = Cli::parse();
    let config = load_config().context("loading configuration")?;
    let state_dir = hokipoki_core::config::state_dir().context("resolving state directory")?;

    let identity = IdentityAgent::new(config.identity.clone(), config.backend.url.clone(), state_dir.clone())?;
    let backend = BackendClient::new(config.backend.url.clone(), config.backend.request_timeout_secs);

    let exit_code = match cli.command {
        Command::Auth { action } => {
            run_auth(action, &identity).await?;
            0
        }
        Command::Provider { action } => run_provider(action, &config, &identity, &backend, &state_dir).await?,
        Command::Request { task, tool, model, credits, auto_apply, files } => {
            run_request(task, tool, model, credits, auto_apply, files, &config, &identity, &backend).await?
        }
    };

    std::process::exit(exit_code);
}

async fn run_auth(action: AuthAction, identity: &IdentityAgent) -> Result<()> {
    match action {
        AuthAction::Login => {
            identity.login().await?;
            println!("logged in");
        }
        AuthAction::Logout => {
            identity.logout().await?;
            println!("logged out");
        }
        AuthAction::Status => match identity.get_token().await {
            Ok(_) => println!("authenticated"),
            Err(_) => println!("not authenticated; run `hokipoki auth login`"),
        },
    }
    Ok(())
}

async fn run_provider(
    action: ProviderAction,
    config: &hokipoki_core::Config,
    identity: &IdentityAgent,
    backend: &BackendClient,
    state_dir: &std::path::Path,
) -> Result<i32> {
    let token = identity.get_token().await.context("fetching access token")?;
    let creds = ToolCredentialStore::open(state_dir.to_path_buf())?;

    match action {
        ProviderAction::Register => {
            for tool in Tool::ALL {
                if creds.credential_for(tool).is_err() {
                    match creds.authenticate(tool).await {
                        Ok(_) => println!("authenticated {tool}"),
                        Err(e) => println!("skipping {tool}: {e}"),
                    }
                }
            }
            let tools = provider::register(&creds, backend, &token.access).await?;
            println!("registered tools: {}", tools.join(", "));
            Ok(0)
        }
        ProviderAction::Listen { runtime, image } => {
            let runtime = match runtime.as_str() {
                "podman" => hokipoki_daemon::sandbox::ContainerRuntime::Podman,
                _ => hokipoki_daemon::sandbox::ContainerRuntime::Docker,
            };
            let listen_config = ListenConfig {
                relay_url: config.relay.connect_url.clone(),
                access_token: token.access,
                runtime,
                image,
            };
            provider::listen(listen_config, &creds, backend, &AutoAccept).await?;
            Ok(0)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_request(
    task: String,
    tool: String,
    model: Option<String>,
    credits: u32,
    auto_apply: bool,
    files: Vec<PathBuf>,
    config: &hokipoki_core::Config,
    identity: &IdentityAgent,
    backend: &BackendClient,
) -> Result<i32> {
    let token = identity.get_token().await.context("fetching access token")?;
    let profile = backend.profile(&token.access).await.context("fetching profile")?;
    let workspace_id = profile
        .workspace_id
        .or_else(|| profile.workspaces.first().map(|w| w.id.clone()))
        .context("no workspace available for this account")?;

    let mut seed_files = Vec::with_capacity(files.len());
    for path in files {
        let content = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        seed_files.push((path, content));
    }

    let state_dir = hokipoki_core::config::state_dir().context("resolving state directory")?;
    let flow_config = RequesterFlowConfig {
        relay_url: config.relay.connect_url.clone(),
        access_token: token.access,
        user_id: profile.id,
        workspace_id,
        tool,
        model,
        task,
        files: seed_files,
        credits,
        tmp_root: std::env::temp_dir(),
        tunnel_bin_dir: config.tunnel.bin_dir.clone().unwrap_or_else(|| state_dir.join("bin")),
        tunnel_config_dir: state_dir.join("tunnels"),
        tunnel: config.tunnel.clone(),
        auto_apply,
    };

    let exit_code = requester::run(flow_config, backend).await?;
    Ok(exit_code as i32)
}
