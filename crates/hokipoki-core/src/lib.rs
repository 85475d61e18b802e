//! HokiPoki Core Library
//!
//! Shared functionality used by every HokiPoki binary (`hokipoki-cli`,
//! `hokipoki-daemon`, `hokipoki-relay`):
//! - Hierarchical configuration resolution
//! - Common error types
//! - Shared time utilities
//! - `tracing` subscriber initialization

pub mod config;
pub mod error;
pub mod time;
pub mod tracing_init;

pub use config::{Config, load_config};
pub use error::{Error, Result};
pub use time::unix_timestamp;
pub use tracing_init::init_tracing;
