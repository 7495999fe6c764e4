//! Server side of the HTTP tunnel
//!
//! Authenticates callers with Basic-Auth, rebuilds the authorization
//! context from the command header, and drives a dedicated `AgentLink`
//! per request.

mod auth;
mod server;

pub use auth::{AuthHeader, BasicCredentials, CredentialCheck, StaticCredentials, constant_time_eq};
pub use server::{DEFAULT_MAX_BODY_SIZE, DEFAULT_PATH, Gateway};
