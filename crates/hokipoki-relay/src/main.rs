//! HokiPoki Relay Server
//!
//! The central coordination point between requesters and providers: peers
//! authenticate with an OIDC access token, register as a requester or
//! provider, and exchange JSON frames over a single WebSocket connection.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use hokipoki_relay::{ws_handler, RelayState};

#[derive(Parser, Debug)]
#[command(name = "hokipoki-relay")]
#[command(version, about = "HokiPoki relay server - matchmaking and message relay")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "HOKIPOKI_RELAY_ADDR", default_value = "0.0.0.0:8443")]
    addr: SocketAddr,

    /// OIDC issuer whose JWKS the relay validates `authenticate` tokens
    /// against, e.g. `https://auth.example.com/realms/hokipoki`.
    #[arg(long, env = "HOKIPOKI_KEYCLOAK_ISSUER")]
    issuer: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "hokipoki_relay=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        issuer = %args.issuer,
        "starting hokipoki-relay"
    );

    let state = RelayState::with_issuer(args.issuer);
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
        })
        .await?;

    info!("relay stopped");
    Ok(())
}
