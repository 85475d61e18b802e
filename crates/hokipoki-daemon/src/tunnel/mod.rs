//! Tunnel Client: exposes a local port through the configured FRP server.

pub mod client;
pub mod platform;

pub use client::{TunnelHandle, ensure_binary, open_tunnel, random_subdomain};
pub use platform::Platform;
