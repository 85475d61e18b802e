//! Tunnel Client: locates/downloads the pinned FRP binary and opens public
//! tunnels to a local port.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::process::Child;
use tracing::{info, warn};

use crate::error::TunnelError;
use crate::procutil::{piped_command, terminate_two_phase};
use crate::tunnel::platform::Platform;

const ADJECTIVES: &[&str] = &["quiet", "brisk", "amber", "lucky", "quick", "mellow", "bold", "calm"];
const ANIMALS: &[&str] = &["otter", "falcon", "lynx", "heron", "badger", "marlin", "wren", "civet"];

/// A single open tunnel. Dropping this struct does not close it — callers
/// must call `close()` explicitly so the kill + config cleanup can be
/// awaited and logged.
pub struct TunnelHandle {
    public_url: String,
    config_path: PathBuf,
    child: Child,
}

impl TunnelHandle {
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Kill the tunnel process and remove its per-tunnel config file.
    pub async fn close(mut self) {
        terminate_two_phase(&mut self.child, Duration::from_secs(5)).await;
        if let Err(e) = tokio::fs::remove_file(&self.config_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.config_path.display(), error = %e, "failed to remove tunnel config");
            }
        }
    }
}

/// Per-tunnel configuration file written alongside the binary before spawn.
#[derive(Serialize)]
struct FrpConfig<'a> {
    #[serde(rename = "serverAddr")]
    server_addr: &'a str,
    #[serde(rename = "serverPort")]
    server_port: u16,
    #[serde(rename = "sharedSecret")]
    shared_secret: &'a str,
    proxies: Vec<FrpProxy<'a>>,
}

#[derive(Serialize)]
struct FrpProxy<'a> {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "localPort")]
    local_port: u16,
    subdomain: &'a str,
}

/// Locate the tunnel binary in `PATH`, or download the release matching the
/// host `{os, arch}` into `<bin_dir>`.
pub async fn ensure_binary(bin_dir: &Path) -> Result<PathBuf, TunnelError> {
    let platform = Platform::host();
    let name = platform.binary_name();

    if let Ok(path) = which(name) {
        return Ok(path);
    }

    let target = bin_dir.join(name);
    if target.exists() {
        return Ok(target);
    }

    tokio::fs::create_dir_all(bin_dir).await?;
    let url = format!(
        "https://releases.hoki-poki.ai/tunnel/{os}-{arch}.{ext}",
        os = platform.os,
        arch = platform.arch,
        ext = platform.ext(),
    );
    info!(%url, dest = %target.display(), "downloading tunnel binary");

    let response = reqwest::get(&url)
        .await
        .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?;
    tokio::fs::write(&target, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755)).await?;
    }

    Ok(target)
}

fn which(name: &str) -> Result<PathBuf, ()> {
    let path_var = std::env::var_os("PATH").ok_or(())?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(())
}

/// Generate a `<adjective>-<animal>-<0..99>` subdomain when the caller does
/// not request a specific one.
pub fn random_subdomain() -> String {
    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let animal = ANIMALS[rng.random_range(0..ANIMALS.len())];
    let n: u8 = rng.random_range(0..100);
    format!("{adj}-{animal}-{n}")
}

/// Open a tunnel exposing `local_port` through the configured FRP server,
/// returning a handle with the resulting public URL.
pub async fn open_tunnel(
    binary: &Path,
    config_dir: &Path,
    server_addr: &str,
    server_port: u16,
    shared_secret: &str,
    subdomain_host: &str,
    local_port: u16,
    subdomain: Option<String>,
) -> Result<TunnelHandle, TunnelError> {
    let subdomain = subdomain.unwrap_or_else(random_subdomain);

    let config = FrpConfig {
        server_addr,
        server_port,
        shared_secret,
        proxies: vec![FrpProxy {
            name: format!("hokipoki-{subdomain}"),
            kind: "http",
            local_port,
            subdomain: &subdomain,
        }],
    };

    tokio::fs::create_dir_all(config_dir).await?;
    let config_path = config_dir.join(format!("{subdomain}.json"));
    let config_json = serde_json::to_string_pretty(&config)
        .map_err(|e| TunnelError::SpawnFailed(e.to_string()))?;
    tokio::fs::write(&config_path, config_json).await?;

    let mut cmd = piped_command(binary);
    cmd.arg("-c").arg(&config_path);

    info!(%subdomain, local_port, "spawning tunnel process");
    let child = cmd
        .spawn()
        .map_err(|e| TunnelError::SpawnFailed(e.to_string()))?;

    let public_url = format!("https://{subdomain}.{subdomain_host}");

    Ok(TunnelHandle {
        public_url,
        config_path,
        child,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn random_subdomain_has_three_hyphenated_parts() {
        let sub = random_subdomain();
        let parts: Vec<&str> = sub.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].parse::<u8>().is_ok());
    }

    #[test]
    fn which_finds_sh_on_path() {
        assert!(which("sh").is_ok());
    }

    #[test]
    fn which_rejects_nonexistent_binary() {
        assert!(which("definitely-not-a-real-binary-xyz").is_err());
    }
}
