//! Authentication for the relay's `authenticate` handshake frame.
//!
//! The relay verifies JWTs issued by the external OIDC identity provider
//! against its published JWKS; it never issues tokens of its own.

pub mod claims;
pub mod jwks;

pub use claims::Claims;
pub use jwks::JwksValidator;
