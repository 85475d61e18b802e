//! HokiPoki Daemon
//!
//! Standalone entry point for exercising the Ephemeral Git Server and
//! Tunnel Client substrate outside of the `hokipoki` CLI's requester/
//! provider flows — useful for operator smoke-testing a relay deployment.
//! The Requester Flow and Provider Flow drive these same modules in-process
//! via the `hokipoki-daemon` library; this binary is not on that path.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use hokipoki_core::init_tracing;
use hokipoki_daemon::EphemeralGitServer;

#[derive(Parser, Debug)]
#[command(name = "hokipoki-daemon")]
#[command(version, about = "HokiPoki daemon substrate smoke-test CLI")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stand up an ephemeral git server for a throwaway task id, print its
    /// bearer + public URL, and wait for Ctrl-C before tearing down.
    ServeGit {
        #[arg(long, default_value = "smoke-test")]
        task_id: String,
        #[arg(long)]
        tmp_dir: Option<PathBuf>,
        #[arg(long, env = "FRP_SERVER_ADDR")]
        frp_server_addr: String,
        #[arg(long, env = "FRP_SERVER_PORT")]
        frp_server_port: u16,
        #[arg(long, env = "FRP_AUTH_TOKEN")]
        frp_auth_token: String,
        #[arg(long, env = "FRP_TUNNEL_DOMAIN")]
        frp_tunnel_domain: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("hokipoki_daemon=info", false);

    let args = Args::parse();
    match args.command {
        Command::ServeGit {
            task_id,
            tmp_dir,
            frp_server_addr,
            frp_server_port,
            frp_auth_token,
            frp_tunnel_domain,
        } => {
            let tmp_dir = tmp_dir.unwrap_or(default_tmp_dir()?);
            tokio::fs::create_dir_all(&tmp_dir).await?;

            let mut server = EphemeralGitServer::initialize(&task_id, &tmp_dir, &[]).await?;

            let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("no home directory"))?;
            let bin_dir = home.join(".hokipoki").join("bin");
            let binary = hokipoki_daemon::tunnel::ensure_binary(&bin_dir).await?;

            server
                .start(
                    &binary,
                    &tmp_dir,
                    &frp_server_addr,
                    frp_server_port,
                    &frp_auth_token,
                    &frp_tunnel_domain,
                )
                .await?;

            if let Some(cfg) = server.get_config() {
                info!(url = %cfg.url, "ephemeral git server ready");
                println!("{}", cfg.url);
            }

            tokio::signal::ctrl_c().await?;
            info!("tearing down");
            server.stop().await;
        }
    }

    Ok(())
}

fn default_tmp_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".hokipoki").join("tmp"))
}
