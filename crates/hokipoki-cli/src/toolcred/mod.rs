//! Tool-Credential Adapter: per-tool acquisition/freshness strategies for the
//! AI CLIs a provider can run, sharing one sealed store (an array of
//! `ToolCredential`) in the Token Vault.
//!
//! Each strategy lives in its own module behind the same shape -- acquire a
//! fresh credential or fail recoverably -- mirroring the one-file-per-concern
//! registry the teacher uses for its command modules.

pub mod claude;
pub mod codex;
pub mod gemini;

use std::path::PathBuf;

use hokipoki_core::unix_timestamp;
use hokipoki_crypto::TokenVault;
use hokipoki_proto::ToolCredential;

use crate::error::ToolCredentialError;

const CREDENTIALS_ENVELOPE: &str = "tokens.enc";

/// The three AI CLIs the Tool-Credential Adapter knows how to authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Claude,
    Codex,
    Gemini,
}

impl Tool {
    pub const ALL: [Self; 3] = [Self::Claude, Self::Codex, Self::Gemini];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ToolCredentialError> {
        match s {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            other => Err(ToolCredentialError::ToolUnsupported(other.to_string())),
        }
    }

    const fn login_command(self) -> &'static str {
        match self {
            Self::Claude => "claude setup-token",
            Self::Codex => "codex login",
            Self::Gemini => "gemini login",
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The sealed on-disk store backing `authenticate`/`listAuthenticated`.
pub struct ToolCredentialStore {
    vault: TokenVault,
    state_dir: PathBuf,
}

impl ToolCredentialStore {
    pub fn open(state_dir: PathBuf) -> Result<Self, ToolCredentialError> {
        let vault = TokenVault::open(&state_dir)?;
        Ok(Self { vault, state_dir })
    }

    fn load_all(&self) -> Result<Vec<ToolCredential>, ToolCredentialError> {
        match self.vault.load(&self.state_dir, CREDENTIALS_ENVELOPE)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_all(&self, creds: &[ToolCredential]) -> Result<(), ToolCredentialError> {
        let bytes = serde_json::to_vec(creds)?;
        self.vault.store(&self.state_dir, CREDENTIALS_ENVELOPE, &bytes)?;
        Ok(())
    }

    /// Run `tool`'s acquisition strategy and overwrite any stale stored
    /// credential for it.
    pub async fn authenticate(&self, tool: Tool) -> Result<ToolCredential, ToolCredentialError> {
        let cred = match tool {
            Tool::Claude => claude::authenticate().await?,
            Tool::Codex => codex::authenticate()?,
            Tool::Gemini => gemini::authenticate()?,
        };

        let mut all = self.load_all()?;
        all.retain(|c| c.tool != tool.name());
        all.push(cred.clone());
        self.save_all(&all)?;
        Ok(cred)
    }

    /// Tools whose stored credential is present and unexpired.
    pub fn list_authenticated(&self) -> Result<Vec<String>, ToolCredentialError> {
        let now = unix_timestamp();
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|c| c.expires_at > now)
            .map(|c| c.tool)
            .collect())
    }

    /// Fetch a fresh, unexpired credential for `tool`, or fail with
    /// `ReauthRequired` naming the exact remedial command.
    pub fn credential_for(&self, tool: Tool) -> Result<ToolCredential, ToolCredentialError> {
        let now = unix_timestamp();
        self.load_all()?
            .into_iter()
            .find(|c| c.tool == tool.name() && c.expires_at > now)
            .ok_or_else(|| ToolCredentialError::ReauthRequired {
                tool: tool.name().to_string(),
                command: tool.login_command().to_string(),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tool_parse_rejects_unknown_name() {
        assert!(matches!(
            Tool::parse("chatgpt"),
            Err(ToolCredentialError::ToolUnsupported(_))
        ));
    }

    #[test]
    fn tool_name_roundtrips_through_parse() {
        for tool in Tool::ALL {
            assert_eq!(Tool::parse(tool.name()).unwrap(), tool);
        }
    }

    #[tokio::test]
    async fn store_reports_unauthenticated_tool_as_reauth_required() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ToolCredentialStore::open(tmp.path().to_path_buf()).unwrap();
        let err = store.credential_for(Tool::Claude).unwrap_err();
        assert!(matches!(err, ToolCredentialError::ReauthRequired { tool, .. } if tool == "claude"));
    }

    #[tokio::test]
    async fn store_round_trips_a_manually_saved_credential() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ToolCredentialStore::open(tmp.path().to_path_buf()).unwrap();
        store
            .save_all(&[ToolCredential {
                tool: "codex".to_string(),
                opaque_blob: "\"{}\"".to_string(),
                expires_at: unix_timestamp() + 3600,
            }])
            .unwrap();

        let cred = store.credential_for(Tool::Codex).unwrap();
        assert_eq!(cred.tool, "codex");
        assert_eq!(store.list_authenticated().unwrap(), vec!["codex"]);
    }

    #[tokio::test]
    async fn expired_credential_is_excluded_from_list_authenticated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ToolCredentialStore::open(tmp.path().to_path_buf()).unwrap();
        store
            .save_all(&[ToolCredential {
                tool: "gemini".to_string(),
                opaque_blob: "\"{}\"".to_string(),
                expires_at: unix_timestamp() - 60,
            }])
            .unwrap();

        assert!(store.list_authenticated().unwrap().is_empty());
        assert!(store.credential_for(Tool::Gemini).is_err());
    }
}
