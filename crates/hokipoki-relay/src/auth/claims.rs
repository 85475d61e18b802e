//! JWT claims the relay expects from an externally-issued OIDC access token.

use serde::{Deserialize, Serialize};

/// The subset of standard OIDC claims the relay actually reads. The relay
/// is a *verifier* of tokens issued by an external identity provider, not
/// an issuer — it never mints these itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the stable user id used as `Peer::user_id`. `Task::requester_id`
    /// is the connection's `peer_id`, not this — frames are addressed to a
    /// live socket, not a user identity.
    pub sub: String,
    /// Expiration (unix timestamp, seconds).
    pub exp: i64,
    /// Issued-at (unix timestamp, seconds).
    #[serde(default)]
    pub iat: i64,
    /// Issuer, checked against the configured `HOKIPOKI_KEYCLOAK_ISSUER`.
    #[serde(default)]
    pub iss: String,
}
