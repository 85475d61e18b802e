//! `codex` native credential file: `<home>/.codex/auth.json`, produced by
//! `codex login`. Freshness is the `exp` claim of the JWT it embeds.

use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

use hokipoki_core::unix_timestamp;
use hokipoki_proto::ToolCredential;

use crate::error::ToolCredentialError;

pub fn authenticate() -> Result<ToolCredential, ToolCredentialError> {
    let path = auth_json_path()?;
    let content = std::fs::read_to_string(&path)?;
    authenticate_from_content(&content)
}

fn authenticate_from_content(content: &str) -> Result<ToolCredential, ToolCredentialError> {
    let doc: Value = serde_json::from_str(content)?;

    let exp = extract_exp(&doc).ok_or_else(|| ToolCredentialError::ReauthRequired {
        tool: "codex".to_string(),
        command: "codex login".to_string(),
    })?;
    if exp < unix_timestamp() {
        return Err(ToolCredentialError::ReauthRequired {
            tool: "codex".to_string(),
            command: "codex login".to_string(),
        });
    }

    // The native file's exact bytes are preserved -- encoded once more as a
    // JSON string -- so the sandbox's double-decode reconstructs it bit for
    // bit.
    let opaque_blob = serde_json::to_string(content)?;

    Ok(ToolCredential {
        tool: "codex".to_string(),
        opaque_blob,
        expires_at: exp,
    })
}

fn auth_json_path() -> Result<PathBuf, ToolCredentialError> {
    let home = dirs::home_dir().ok_or_else(|| ToolCredentialError::ReauthRequired {
        tool: "codex".to_string(),
        command: "codex login".to_string(),
    })?;
    Ok(home.join(".codex").join("auth.json"))
}

/// Walk `auth.json`'s `tokens` object for the first embedded JWT and read
/// its `exp` claim, without verifying the signature -- this is a third-party
/// token we hold no key for.
fn extract_exp(doc: &Value) -> Option<i64> {
    let tokens = doc.get("tokens")?.as_object()?;
    tokens.values().find_map(|v| v.as_str().and_then(decode_jwt_exp))
}

fn decode_jwt_exp(token: &str) -> Option<i64> {
    let payload_b64 = token.split('.').nth(1)?;
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let value: Value = serde_json::from_slice(&payload).ok()?;
    value.get("exp")?.as_i64()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
        let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}"));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn extracts_exp_from_embedded_jwt() {
        let doc = serde_json::json!({"tokens": {"id_token": jwt_with_exp(1_900_000_000)}});
        assert_eq!(extract_exp(&doc), Some(1_900_000_000));
    }

    #[test]
    fn rejects_expired_token() {
        let content = serde_json::json!({"tokens": {"id_token": jwt_with_exp(1)}}).to_string();
        let err = authenticate_from_content(&content).unwrap_err();
        assert!(matches!(err, ToolCredentialError::ReauthRequired { tool, .. } if tool == "codex"));
    }

    #[test]
    fn accepts_unexpired_token_and_double_encodes_blob() {
        let content =
            serde_json::json!({"tokens": {"id_token": jwt_with_exp(4_000_000_000)}}).to_string();
        let cred = authenticate_from_content(&content).unwrap();
        assert_eq!(cred.tool, "codex");
        assert_eq!(cred.expires_at, 4_000_000_000);
        // Double-encoded: decoding the blob once yields the original JSON text.
        let once: String = serde_json::from_str(&cred.opaque_blob).unwrap();
        assert_eq!(once, content);
    }

    #[test]
    fn missing_tokens_object_is_reauth_required() {
        let content = "{}".to_string();
        let err = authenticate_from_content(&content).unwrap_err();
        assert!(matches!(err, ToolCredentialError::ReauthRequired { .. }));
    }
}
