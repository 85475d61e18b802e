//! HokiPoki Wire Protocol
//!
//! Hand-written `serde` types for the Relay Protocol (a single bidirectional
//! JSON-framed channel per peer, carried over a WebSocket text frame per
//! message) and the data-model entities shared by the daemon, relay, and CLI
//! crates.
//!
//! Every frame is `{type, ...}`; `Frame` is tagged on `type` with
//! `rename_all = "snake_case"` so the wire spelling matches the protocol
//! document exactly (`connection_confirmed`, `register_provider`, ...).

pub mod model;
pub mod p2p;
pub mod wire;

pub use model::{
    EphemeralRepo, IdentityToken, Peer, PeerRole, SandboxSession, Task, TaskStatus,
    ToolCredential, TunnelConfig,
};
pub use p2p::{P2pEnvelope, P2pPayload};
pub use wire::Frame;
