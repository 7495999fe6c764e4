//! Backend SSH agent access
//!
//! - `Upstream`: location of the real agent and how to reach it
//! - `AgentLink`: one correlated connection to that agent

mod link;
mod upstream;

pub use link::{AgentLink, PendingKind, PendingResponse};
pub use upstream::Upstream;
