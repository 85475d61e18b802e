//! Configuration resolution for HokiPoki.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/hokipoki/settings.json)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by each binary after `load_config`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete HokiPoki configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub tunnel: TunnelSettings,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub feature_flags: std::collections::HashMap<String, bool>,
}

/// Identity Agent / OIDC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Keycloak (or other OIDC-compliant) issuer base URL.
    pub keycloak_issuer: String,
    /// OAuth client id used for the Authorization Code + PKCE flow.
    pub client_id: String,
    /// Fixed loopback port the callback server binds to.
    pub callback_port: u16,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            keycloak_issuer: "https://auth.hoki-poki.ai/realms/hokipoki".to_string(),
            client_id: "hokipoki-cli".to_string(),
            callback_port: 8765,
        }
    }
}

/// Backend REST API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL for the Backend REST API.
    pub url: String,
    /// Network timeout, in seconds, for advisory calls (profile, task logging).
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "https://api.hoki-poki.ai".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Tunnel Client (FRP) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TunnelSettings {
    pub frp_server_addr: Option<String>,
    pub frp_server_port: Option<u16>,
    pub frp_http_port: Option<u16>,
    pub frp_tunnel_domain: Option<String>,
    /// Directory the tunnel binary is downloaded into, under `<home>/.hokipoki/bin/`.
    pub bin_dir: Option<PathBuf>,
}

/// Sandbox Executor resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock timeout for a single task execution, in seconds.
    pub execution_timeout_secs: u64,
    /// Maximum bytes of combined stdout/stderr retained from the container.
    pub max_output_bytes: usize,
    /// Size, in MiB, of the encrypted tmpfs-backed loop device.
    pub encrypted_volume_mib: u64,
    /// Container runtime binary: `docker` or `podman`.
    pub container_runtime: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: 20 * 60,
            max_output_bytes: 10 * 1024 * 1024,
            encrypted_volume_mib: 512,
            container_runtime: "docker".to_string(),
        }
    }
}

/// Relay configuration: server-side bind settings (`hokipoki-relay` binary)
/// plus the client-side connect URL used by the Requester/Provider flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub port: u16,
    /// How often the cached JWKS document is refetched, in seconds.
    pub jwks_refresh_secs: u64,
    /// Hard ack-wait timeout for `(confirmation, confirmation_ack)` pairs, in seconds.
    pub confirmation_ack_timeout_secs: u64,
    /// WebSocket URL a peer process connects to. Not part of the wire
    /// protocol itself; an operational detail each deployment pins.
    pub connect_url: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: 8443,
            jwks_refresh_secs: 3600,
            confirmation_ack_timeout_secs: 5,
            connect_url: "wss://relay.hoki-poki.ai/ws".to_string(),
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config() -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path (`<config-dir>/hokipoki/settings.json`).
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".hokipoki").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/hokipoki/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("hokipoki").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Get the `<home>/.hokipoki/` state directory (key file, sealed tokens, bin/, tmp/).
pub fn state_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".hokipoki"))
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.identity = overlay.identity;
    base.backend = overlay.backend;

    if overlay.tunnel.frp_server_addr.is_some() {
        base.tunnel.frp_server_addr = overlay.tunnel.frp_server_addr;
    }
    if overlay.tunnel.frp_server_port.is_some() {
        base.tunnel.frp_server_port = overlay.tunnel.frp_server_port;
    }
    if overlay.tunnel.frp_http_port.is_some() {
        base.tunnel.frp_http_port = overlay.tunnel.frp_http_port;
    }
    if overlay.tunnel.frp_tunnel_domain.is_some() {
        base.tunnel.frp_tunnel_domain = overlay.tunnel.frp_tunnel_domain;
    }
    if overlay.tunnel.bin_dir.is_some() {
        base.tunnel.bin_dir = overlay.tunnel.bin_dir;
    }

    base.sandbox = overlay.sandbox;
    base.relay = overlay.relay;
    base.feature_flags.extend(overlay.feature_flags);
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("HOKIPOKI_KEYCLOAK_ISSUER") {
        config.identity.keycloak_issuer = val;
    }
    if let Ok(val) = std::env::var("HOKIPOKI_CLIENT_ID") {
        config.identity.client_id = val;
    }
    if let Ok(val) = std::env::var("BACKEND_URL") {
        config.backend.url = val;
    }
    if let Ok(val) = std::env::var("FRP_SERVER_ADDR") {
        config.tunnel.frp_server_addr = Some(val);
    }
    if let Ok(val) = std::env::var("FRP_SERVER_PORT") {
        if let Ok(n) = val.parse() {
            config.tunnel.frp_server_port = Some(n);
        }
    }
    if let Ok(val) = std::env::var("FRP_HTTP_PORT") {
        if let Ok(n) = val.parse() {
            config.tunnel.frp_http_port = Some(n);
        }
    }
    if let Ok(val) = std::env::var("FRP_TUNNEL_DOMAIN") {
        config.tunnel.frp_tunnel_domain = Some(val);
    }
    if let Ok(val) = std::env::var("HOKIPOKI_RELAY_URL") {
        config.relay.connect_url = val;
    }
    // FRP_AUTH_TOKEN is deliberately not mirrored onto `Config` -- it is read
    // directly by the tunnel client at spawn time so it never round-trips
    // through a struct that gets logged or serialized back to disk.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_20_minute_sandbox_timeout() {
        let config = Config::default();
        assert_eq!(config.sandbox.execution_timeout_secs, 20 * 60);
    }

    #[test]
    fn default_config_has_5s_confirmation_ack_timeout() {
        let config = Config::default();
        assert_eq!(config.relay.confirmation_ack_timeout_secs, 5);
    }

    #[test]
    fn default_backend_url_matches_spec() {
        let config = Config::default();
        assert_eq!(config.backend.url, "https://api.hoki-poki.ai");
    }

    #[test]
    fn env_override_replaces_backend_url() {
        std::env::set_var("BACKEND_URL", "https://staging.example.test");
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.backend.url, "https://staging.example.test");
        std::env::remove_var("BACKEND_URL");
    }
}
