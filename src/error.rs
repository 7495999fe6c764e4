//! Error types for socketauth

use thiserror::Error;

/// Main error type for socketauth
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A response did not match the request it was paired with
    #[error("Correlation error: {0}")]
    Correlation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scope error: {0}")]
    Scope(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The HTTP leg of the tunnel failed (bad status, oversized body, timeout)
    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Upstream agent not available: {0}")]
    UpstreamNotAvailable(String),

    #[error("Upstream agent closed the connection")]
    UpstreamClosed,

    #[error("Request cancelled before the agent responded")]
    Cancelled,

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
