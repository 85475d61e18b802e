//! PKCE (Proof Key for Code Exchange) challenge generation for the Identity
//! Agent's OIDC authorization-code flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// A freshly generated PKCE pair: the secret `verifier` kept by the client
/// and the `challenge` sent in the authorization request.
#[derive(Clone)]
pub struct PkceChallenge {
    verifier: String,
    challenge: String,
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkceChallenge {
    /// Generate a 32-byte random verifier and its `S256` challenge.
    pub fn generate() -> Self {
        let mut verifier_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut verifier_bytes);
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        let challenge = Self::s256(&verifier);
        Self { verifier, challenge }
    }

    /// The secret verifier, sent only in the final token exchange request.
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// The `S256` challenge, sent in the initial authorization request.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    fn s256(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

/// Generate a random `state` parameter for CSRF protection on the
/// authorization request, matched against the loopback callback.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_32_bytes_before_encoding() {
        let pkce = PkceChallenge::generate();
        let decoded = URL_SAFE_NO_PAD.decode(pkce.verifier()).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn challenge_is_s256_of_verifier() {
        let pkce = PkceChallenge::generate();
        let expected = PkceChallenge::s256(pkce.verifier());
        assert_eq!(pkce.challenge(), expected);
    }

    #[test]
    fn two_challenges_are_distinct() {
        let a = PkceChallenge::generate();
        let b = PkceChallenge::generate();
        assert_ne!(a.verifier(), b.verifier());
        assert_ne!(a.challenge(), b.challenge());
    }

    #[test]
    fn debug_impl_redacts_verifier() {
        let pkce = PkceChallenge::generate();
        let debug_output = format!("{pkce:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains(pkce.verifier()));
    }

    #[test]
    fn state_values_are_distinct() {
        assert_ne!(generate_state(), generate_state());
    }
}
