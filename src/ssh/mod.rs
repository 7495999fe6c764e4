//! SSH invocation parsing
//!
//! Turns the command line of the ssh client that is using the tunnel into
//! an [`AuthorizationContext`].

mod context;
mod invocation;

pub use context::{AuthorizationContext, is_ssh_program};
pub use invocation::{GitOperation, OptionValue, RemoteCommand, SshInvocation, default_user};
