//! `gemini` native credential file: `<home>/.gemini/oauth_creds.json`.
//! Freshness is the literal `expiry_date` millisecond timestamp -- no JWT
//! decoding required, unlike `codex`.

use std::path::PathBuf;

use serde_json::Value;

use hokipoki_core::unix_timestamp;
use hokipoki_proto::ToolCredential;

use crate::error::ToolCredentialError;

pub fn authenticate() -> Result<ToolCredential, ToolCredentialError> {
    let path = creds_path()?;
    let content = std::fs::read_to_string(&path)?;
    authenticate_from_content(&content)
}

fn authenticate_from_content(content: &str) -> Result<ToolCredential, ToolCredentialError> {
    let doc: Value = serde_json::from_str(content)?;

    let expiry_ms = doc
        .get("expiry_date")
        .and_then(Value::as_i64)
        .ok_or_else(|| ToolCredentialError::ReauthRequired {
            tool: "gemini".to_string(),
            command: "gemini login".to_string(),
        })?;
    let expires_at = expiry_ms / 1000;

    if expires_at < unix_timestamp() {
        return Err(ToolCredentialError::ReauthRequired {
            tool: "gemini".to_string(),
            command: "gemini login".to_string(),
        });
    }

    let opaque_blob = serde_json::to_string(content)?;

    Ok(ToolCredential {
        tool: "gemini".to_string(),
        opaque_blob,
        expires_at,
    })
}

fn creds_path() -> Result<PathBuf, ToolCredentialError> {
    let home = dirs::home_dir().ok_or_else(|| ToolCredentialError::ReauthRequired {
        tool: "gemini".to_string(),
        command: "gemini login".to_string(),
    })?;
    Ok(home.join(".gemini").join("oauth_creds.json"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_unexpired_credential() {
        let content = serde_json::json!({"expiry_date": 4_000_000_000_000_i64}).to_string();
        let cred = authenticate_from_content(&content).unwrap();
        assert_eq!(cred.tool, "gemini");
        assert_eq!(cred.expires_at, 4_000_000_000);
    }

    #[test]
    fn rejects_expired_credential() {
        let content = serde_json::json!({"expiry_date": 1000_i64}).to_string();
        let err = authenticate_from_content(&content).unwrap_err();
        assert!(matches!(err, ToolCredentialError::ReauthRequired { tool, .. } if tool == "gemini"));
    }

    #[test]
    fn missing_expiry_date_is_reauth_required() {
        let err = authenticate_from_content("{}").unwrap_err();
        assert!(matches!(err, ToolCredentialError::ReauthRequired { .. }));
    }
}
