//! Client side of the HTTP tunnel
//!
//! - `TunnelListener`: the local socket the wrapped command talks to
//! - `TunnelSession`: turns bursts of agent frames into HTTP exchanges
//! - `TunnelClient`: the HTTP transport

mod client;
mod listener;
mod peer;
mod session;

pub use client::{
    COMMAND_HEADER, DEFAULT_MAX_RESPONSE_SIZE, DEFAULT_TIMEOUT, FRAME_CONTENT_TYPE, TunnelClient,
    TunnelOptions,
};
pub use listener::TunnelListener;
pub use peer::{peer_ssh_args, ssh_args, ssh_args_from_cmdline};
pub use session::TunnelSession;
