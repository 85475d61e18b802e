//! HokiPoki CLI
//!
//! Identity Agent, Tool-Credential Adapter, Backend REST client, Relay
//! Protocol client, and the Requester/Provider flows that drive a task
//! end to end.

pub mod backend;
pub mod error;
pub mod flows;
pub mod identity;
pub mod relay_client;
pub mod toolcred;
