//! Requester Flow and Provider Flow: the two task-lifecycle orchestrations
//! built on top of the Relay, Backend, Tunnel, Ephemeral Git Server, and
//! Sandbox Executor collaborators.

pub mod patch;
pub mod provider;
pub mod requester;
