//! `claude setup-token`: an interactive subprocess whose stdout/stderr
//! carries the OAuth token, scraped with a regex rather than parsed as
//! structured output -- the only form Claude Code's own CLI gives us.

use std::process::Stdio;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::warn;

use hokipoki_core::unix_timestamp;
use hokipoki_proto::ToolCredential;

use crate::error::ToolCredentialError;

/// Cached for 30 days per the freshness policy; re-running `setup-token` is
/// the only way to refresh it, so this is a coarse upper bound, not a
/// verified expiry.
const CACHE_SECS: i64 = 30 * 24 * 60 * 60;

pub async fn authenticate() -> Result<ToolCredential, ToolCredentialError> {
    let mut child = Command::new("claude")
        .arg("setup-token")
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|_| ToolCredentialError::ScrapeFailed)?;

    let stdout = child.stdout.take().ok_or(ToolCredentialError::ScrapeFailed)?;
    let stderr = child.stderr.take().ok_or(ToolCredentialError::ScrapeFailed)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    spawn_line_forwarder(stdout, tx.clone());
    spawn_line_forwarder(stderr, tx);

    let mut token = None;
    while let Some(line) = rx.recv().await {
        if let Some(found) = scan_for_token(&line) {
            token = Some(found);
        }
    }

    let status = child.wait().await.map_err(|_| ToolCredentialError::ScrapeFailed)?;
    if !status.success() {
        warn!(?status, "claude setup-token exited non-zero");
    }

    let token = token.ok_or(ToolCredentialError::ScrapeFailed)?;
    // Unlike codex/gemini there is no native credential file to round-trip
    // through a double JSON-decode in the sandbox -- the entrypoint script
    // exports `CLAUDE_CODE_OAUTH_TOKEN` straight from `OAUTH_TOKEN`, so the
    // blob is the bare `sk-ant-oat01-...` value, not a JSON-quoted string.
    Ok(ToolCredential {
        tool: "claude".to_string(),
        opaque_blob: token,
        expires_at: unix_timestamp() + CACHE_SECS,
    })
}

fn scan_for_token(line: &str) -> Option<String> {
    let pattern = token_pattern();
    pattern.find(line).map(|m| m.as_str().to_string())
}

fn token_pattern() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"sk-ant-oat01-[A-Za-z0-9_-]+").unwrap()
}

fn spawn_line_forwarder<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = tx.send(line);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_token_out_of_surrounding_log_noise() {
        let line = "Paste this into your browser... token=sk-ant-oat01-AbC123_-xyz done";
        assert_eq!(
            scan_for_token(line),
            Some("sk-ant-oat01-AbC123_-xyz".to_string())
        );
    }

    #[test]
    fn returns_none_without_a_match() {
        assert!(scan_for_token("no token on this line").is_none());
    }
}
