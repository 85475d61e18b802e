//! HokiPoki Cryptography Library
//!
//! Provides the cryptographic primitives backing the Token Vault and the
//! Identity Agent's OIDC flow:
//!
//! - **Vault**: AES-256-GCM sealing of long-lived secrets (IdentityToken,
//!   TunnelConfig, ToolCredential array) under a single on-disk key.
//! - **PKCE**: `S256` challenge/verifier generation for the authorization-code
//!   + PKCE exchange.

pub mod error;
pub mod pkce;
pub mod vault;

pub use error::CryptoError;
pub use pkce::{PkceChallenge, generate_state};
pub use vault::{Envelope, TokenVault};
