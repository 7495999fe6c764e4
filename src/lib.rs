//! socketauth - SSH agent over HTTP with repository-scoped keys
//!
//! A wrapped command (`socketauth run -- git clone ...`) gets a local agent
//! socket whose traffic is tunneled over HTTP to a gateway
//! (`socketauth serve`) holding the real keys. The gateway only allows
//! listing and signing, and only lists the keys whose comment scopes them
//! to the repository being accessed.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod protocol;
pub mod scope;
pub mod ssh;
pub mod tunnel;
pub mod utils;

pub use error::{Error, Result};

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
pub const NAME: &str = env!("CARGO_PKG_NAME");
