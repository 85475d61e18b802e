//! Identity Agent: OIDC authorization-code+PKCE login with a loopback
//! callback listener, silent refresh, and id-token logout.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use hokipoki_core::config::IdentityConfig;
use hokipoki_core::unix_timestamp;
use hokipoki_crypto::pkce::{generate_state, PkceChallenge};
use hokipoki_crypto::TokenVault;
use hokipoki_proto::IdentityToken;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::IdentityAgentError;

const IDENTITY_ENVELOPE: &str = "keycloak_token.enc";

/// Refresh a cached access token once less than this much time remains.
const REFRESH_SKEW_SECS: i64 = 5 * 60;

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    expected_state: String,
    result_tx: Arc<std::sync::Mutex<Option<oneshot::Sender<CallbackOutcome>>>>,
}

enum CallbackOutcome {
    Code(String),
    Error(String),
}

/// Drives the OIDC authorization-code+PKCE flow and caches the resulting
/// token set in the Token Vault.
pub struct IdentityAgent {
    config: IdentityConfig,
    backend_url: String,
    vault: TokenVault,
    state_dir: std::path::PathBuf,
    http: reqwest::Client,
}

impl IdentityAgent {
    pub fn new(
        config: IdentityConfig,
        backend_url: String,
        state_dir: std::path::PathBuf,
    ) -> Result<Self, IdentityAgentError> {
        let vault = TokenVault::open(&state_dir)?;
        Ok(Self {
            config,
            backend_url,
            vault,
            state_dir,
            http: reqwest::Client::new(),
        })
    }

    /// Run the full authorization-code+PKCE flow: open the platform browser,
    /// wait for the loopback callback, exchange the code, probe email
    /// verification, and cache the result.
    pub async fn login(&self) -> Result<IdentityToken, IdentityAgentError> {
        let pkce = PkceChallenge::generate();
        let state = generate_state();

        let auth_url = format!(
            "{issuer}/protocol/openid-connect/auth?\
             response_type=code&client_id={client_id}&\
             redirect_uri={redirect}&scope=openid%20email&\
             code_challenge={challenge}&code_challenge_method=S256&state={state}",
            issuer = self.config.keycloak_issuer,
            client_id = self.config.client_id,
            redirect = redirect_uri(self.config.callback_port),
            challenge = pkce.challenge(),
        );

        info!(port = self.config.callback_port, "starting loopback callback listener");
        let code = self.await_callback(&auth_url, state).await?;

        let token = self.exchange_code(&code, pkce.verifier()).await?;

        if !self.email_verified(&token).await {
            return Err(IdentityAgentError::EmailUnverified);
        }

        self.store(&token)?;
        info!("login complete, token cached");
        Ok(token)
    }

    /// Return a valid access token, refreshing it if less than 5 minutes
    /// remain. Fails with `Reauthenticate` if nothing is cached or the
    /// refresh call fails.
    pub async fn get_token(&self) -> Result<IdentityToken, IdentityAgentError> {
        let mut token = self.load()?.ok_or(IdentityAgentError::Reauthenticate)?;

        if token.expires_at - unix_timestamp() < REFRESH_SKEW_SECS {
            token = self.refresh(&token).await?;
            self.store(&token)?;
        }
        Ok(token)
    }

    /// Best-effort end-session call, then delete every sealed envelope this
    /// process owns (identity token and tunnel config cache).
    pub async fn logout(&self) -> Result<(), IdentityAgentError> {
        if let Some(token) = self.load()? {
            let end_session = format!(
                "{}/protocol/openid-connect/logout",
                self.config.keycloak_issuer
            );
            let id_token_hint = token.id_token.clone().unwrap_or_default();
            let result = self
                .http
                .post(&end_session)
                .form(&[("id_token_hint", id_token_hint)])
                .send()
                .await;
            if let Err(e) = result {
                warn!(error = %e, "end-session call failed, continuing with local logout");
            }
        }

        TokenVault::delete(&self.state_dir, IDENTITY_ENVELOPE)?;
        TokenVault::delete(&self.state_dir, "tunnel_config.enc")?;
        Ok(())
    }

    fn load(&self) -> Result<Option<IdentityToken>, IdentityAgentError> {
        match self.vault.load(&self.state_dir, IDENTITY_ENVELOPE)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                IdentityAgentError::TokenExchangeFailed(format!("corrupt cached token: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    fn store(&self, token: &IdentityToken) -> Result<(), IdentityAgentError> {
        let bytes = serde_json::to_vec(token)
            .map_err(|e| IdentityAgentError::TokenExchangeFailed(e.to_string()))?;
        self.vault.store(&self.state_dir, IDENTITY_ENVELOPE, &bytes)?;
        Ok(())
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<IdentityToken, IdentityAgentError> {
        let token_endpoint = format!(
            "{}/protocol/openid-connect/token",
            self.config.keycloak_issuer
        );
        let response = self
            .http
            .post(&token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", &self.config.client_id),
                ("code", code),
                ("redirect_uri", &redirect_uri(self.config.callback_port)),
                ("code_verifier", verifier),
            ])
            .send()
            .await
            .map_err(|e| IdentityAgentError::TokenExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IdentityAgentError::TokenExchangeFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityAgentError::TokenExchangeFailed(e.to_string()))?;

        Ok(IdentityToken {
            access: body.access_token,
            refresh: body.refresh_token,
            id_token: body.id_token,
            expires_at: unix_timestamp() + i64::from(body.expires_in),
        })
    }

    async fn refresh(&self, token: &IdentityToken) -> Result<IdentityToken, IdentityAgentError> {
        let token_endpoint = format!(
            "{}/protocol/openid-connect/token",
            self.config.keycloak_issuer
        );
        let response = self
            .http
            .post(&token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", &self.config.client_id),
                ("refresh_token", &token.refresh),
            ])
            .send()
            .await
            .map_err(|_| IdentityAgentError::Reauthenticate)?;

        if !response.status().is_success() {
            return Err(IdentityAgentError::Reauthenticate);
        }

        let body: TokenResponse = response.json().await.map_err(|_| IdentityAgentError::Reauthenticate)?;
        Ok(IdentityToken {
            access: body.access_token,
            refresh: body.refresh_token,
            id_token: body.id_token.or_else(|| token.id_token.clone()),
            expires_at: unix_timestamp() + i64::from(body.expires_in),
        })
    }

    /// Fail-open by design: if the probe itself is unreachable, the login
    /// proceeds rather than blocking availability on a secondary service.
    async fn email_verified(&self, token: &IdentityToken) -> bool {
        let claims = match decode_claims_unverified(&token.access) {
            Some(c) => c,
            None => return true,
        };
        let Some(email) = claims.email else { return true };

        let url = format!("{}/api/auth/check-verified", self.backend_url);
        match self.http.get(&url).query(&[("email", email)]).send().await {
            Ok(resp) => match resp.json::<VerifiedResponse>().await {
                Ok(body) => body.verified,
                Err(_) => true,
            },
            Err(e) => {
                warn!(error = %e, "email-verification probe unreachable, assuming verified");
                true
            }
        }
    }

    async fn await_callback(&self, auth_url: &str, expected_state: String) -> Result<String, IdentityAgentError> {
        let (tx, rx) = oneshot::channel();
        let callback_state = CallbackState {
            expected_state,
            result_tx: Arc::new(std::sync::Mutex::new(Some(tx))),
        };

        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(callback_state);

        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.config.callback_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| IdentityAgentError::CallbackFailed(e.to_string()))?;

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        open_browser(auth_url);

        let outcome = rx
            .await
            .map_err(|_| IdentityAgentError::CallbackFailed("listener closed without a callback".to_string()))?;
        server.abort();

        match outcome {
            CallbackOutcome::Code(code) => Ok(code),
            CallbackOutcome::Error(message) => Err(IdentityAgentError::TokenExchangeFailed(message)),
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let outcome = match (params.code, params.state, params.error) {
        (_, _, Some(error)) => CallbackOutcome::Error(error),
        (Some(code), Some(received_state), None) if received_state == state.expected_state => {
            CallbackOutcome::Code(code)
        }
        (Some(_), Some(_), None) => CallbackOutcome::Error("state mismatch".to_string()),
        _ => CallbackOutcome::Error("callback missing code/state".to_string()),
    };

    let success = matches!(outcome, CallbackOutcome::Code(_));
    if let Ok(mut guard) = state.result_tx.lock() {
        if let Some(tx) = guard.take() {
            let _ = tx.send(outcome);
        }
    }

    if success {
        Html("<html><body><h2>Signed in to HokiPoki</h2><p>You may close this tab.</p></body></html>")
    } else {
        Html("<html><body><h2>Sign-in failed</h2><p>Return to the terminal and try again.</p></body></html>")
    }
}

fn redirect_uri(port: u16) -> String {
    format!("http://127.0.0.1:{port}/callback")
}

fn open_browser(url: &str) {
    let result = if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(url).spawn()
    } else if cfg!(target_os = "windows") {
        std::process::Command::new("cmd").args(["/C", "start", url]).spawn()
    } else {
        std::process::Command::new("xdg-open").arg(url).spawn()
    };
    if let Err(e) = result {
        warn!(error = %e, %url, "failed to launch browser automatically; open this URL manually");
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    id_token: Option<String>,
    expires_in: u32,
}

#[derive(Deserialize)]
struct VerifiedResponse {
    verified: bool,
}

struct UnverifiedClaims {
    email: Option<String>,
}

/// Decode the JWT payload without verifying its signature, purely to read
/// the `email` claim for the verification probe. The relay separately
/// verifies the token's signature against the issuer's JWKS.
fn decode_claims_unverified(token: &str) -> Option<UnverifiedClaims> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let payload_b64 = token.split('.').nth(1)?;
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&payload).ok()?;
    Some(UnverifiedClaims {
        email: value.get("email").and_then(|v| v.as_str()).map(str::to_string),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redirect_uri_uses_127_0_0_1() {
        assert_eq!(redirect_uri(8765), "http://127.0.0.1:8765/callback");
    }

    #[test]
    fn decode_claims_unverified_reads_email() {
        let header = base64_url(b"{\"alg\":\"none\"}");
        let payload = base64_url(b"{\"email\":\"a@example.com\"}");
        let token = format!("{header}.{payload}.sig");
        let claims = decode_claims_unverified(&token).unwrap();
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn decode_claims_unverified_rejects_garbage() {
        assert!(decode_claims_unverified("not-a-jwt").is_none());
    }

    fn base64_url(bytes: &[u8]) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        URL_SAFE_NO_PAD.encode(bytes)
    }
}
