//! JWKS-based verification of the OIDC access tokens issued by the
//! Identity Agent's external OIDC provider.
//!
//! The relay validates, it never issues: the key material comes from the
//! issuer's published JWKS document rather than a shared secret the relay
//! holds. The fetched key set is cached and refreshed periodically so a
//! key-rotation at the issuer does not require a relay restart.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use super::claims::Claims;
use crate::error::RelayError;

const JWKS_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize, Clone)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

struct Cache {
    keys: HashMap<String, Jwk>,
    fetched_at: Instant,
}

/// Validates bearer tokens against an OIDC issuer's JWKS endpoint.
pub struct JwksValidator {
    issuer: String,
    jwks_uri: String,
    http: reqwest::Client,
    cache: RwLock<Option<Cache>>,
}

impl JwksValidator {
    pub fn new(issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let jwks_uri = format!("{}/protocol/openid-connect/certs", issuer.trim_end_matches('/'));
        Self {
            issuer,
            jwks_uri,
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    /// Validate `token`'s signature against the cached (or freshly fetched)
    /// JWKS, check `exp`, and return its claims.
    pub async fn validate(&self, token: &str) -> Result<Claims, RelayError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| RelayError::AuthFailed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| RelayError::AuthFailed("token missing kid".to_string()))?;

        let jwk = self.key_for(&kid).await?;
        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| RelayError::AuthFailed(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);

        let data = jsonwebtoken::decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| RelayError::AuthFailed(e.to_string()))?;
        Ok(data.claims)
    }

    async fn key_for(&self, kid: &str) -> Result<Jwk, RelayError> {
        if let Some(jwk) = self.cached_key(kid) {
            return Ok(jwk);
        }
        self.refresh().await?;
        self.cached_key(kid)
            .ok_or_else(|| RelayError::AuthFailed(format!("unknown signing key: {kid}")))
    }

    fn cached_key(&self, kid: &str) -> Option<Jwk> {
        let guard = self.cache.read().ok()?;
        let cache = guard.as_ref()?;
        if cache.fetched_at.elapsed() > JWKS_CACHE_TTL {
            return None;
        }
        cache.keys.get(kid).cloned()
    }

    async fn refresh(&self) -> Result<(), RelayError> {
        let doc: JwksDocument = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| RelayError::AuthFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| RelayError::AuthFailed(e.to_string()))?;

        let keys = doc.keys.into_iter().map(|k| (k.kid.clone(), k)).collect();
        let mut guard = self
            .cache
            .write()
            .map_err(|_| RelayError::AuthFailed("jwks cache poisoned".to_string()))?;
        *guard = Some(Cache {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn jwks_uri_derived_from_issuer() {
        let v = JwksValidator::new("https://auth.hoki-poki.ai/realms/hokipoki");
        assert_eq!(
            v.jwks_uri,
            "https://auth.hoki-poki.ai/realms/hokipoki/protocol/openid-connect/certs"
        );
    }

    #[tokio::test]
    async fn unknown_kid_without_cache_triggers_refresh_attempt() {
        let v = JwksValidator::new("https://issuer.invalid");
        // No network in tests: refresh() will fail, surfacing as AuthFailed
        // rather than panicking.
        let result = v.key_for("missing-kid").await;
        assert!(result.is_err());
    }
}
