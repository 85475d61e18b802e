//! HokiPoki Relay
//!
//! A single bidirectional JSON-framed channel per peer, carried over a
//! WebSocket text frame per message. Owns the authoritative, in-memory
//! task table, the provider pool, and the matchmaking state machine;
//! relays opaque `p2p_relay` payloads between a matched requester/provider
//! pair without ever inspecting them.

pub mod auth;
pub mod error;
pub mod matching;
pub mod state;
pub mod ws;

pub use error::RelayError;
pub use state::RelayState;
pub use ws::ws_handler;
