//! Exit code definitions for socketauth
//!
//! `socketauth run` exits with the wrapped command's code; these apply when
//! socketauth itself fails.

use crate::Error;

/// Exit codes for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Invalid config, missing required settings
    ConfigError = 2,
    /// Cannot create or bind the local socket
    SocketError = 3,
    /// Cannot reach the backend agent
    UpstreamError = 4,
    /// The HTTP leg of the tunnel failed
    TunnelError = 5,
    /// The wrapped command could not be started
    SpawnError = 127,
}

impl ExitCode {
    /// Classify a failure by the first socketauth error in its chain
    pub fn for_error(error: &anyhow::Error) -> Self {
        let Some(error) = error.chain().find_map(|e| e.downcast_ref::<Error>()) else {
            return ExitCode::GeneralError;
        };
        match error {
            Error::Config(_) => ExitCode::ConfigError,
            Error::Socket(_) => ExitCode::SocketError,
            Error::UpstreamNotAvailable(_) | Error::UpstreamClosed => ExitCode::UpstreamError,
            Error::Tunnel(_) | Error::Http(_) => ExitCode::TunnelError,
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<ExitCode> for u8 {
    fn from(code: ExitCode) -> Self {
        code as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
