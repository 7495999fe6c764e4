//! Logging for socketauth
//!
//! Diagnostics go to stderr through tracing-subscriber, leaving the wrapped
//! command's stdout untouched. The gateway can additionally keep a JSONL
//! audit log of its decisions.

pub mod jsonl;

pub use jsonl::{JsonlWriter, LogEvent, LogEventKind};

use std::path::Path;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// -1 for quiet, 0 for normal, +1 for verbose
    pub verbosity: i8,
}

impl LogConfig {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        let verbosity = if quiet {
            -1
        } else if verbose {
            1
        } else {
            0
        };
        Self { verbosity }
    }

    fn min_level(&self) -> Level {
        match self.verbosity {
            v if v < 0 => Level::WARN,
            0 => Level::INFO,
            _ => Level::DEBUG,
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the level picked by the flags. Calling this twice
/// keeps the first subscriber.
pub fn init(config: &LogConfig) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.min_level().into())
        .from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
    if let Err(e) = result {
        eprintln!("Warning: logging already initialized: {}", e);
    }
}

/// Open the gateway audit log, creating its directory if needed
pub fn open_audit_log(path: &Path) -> crate::Result<Arc<JsonlWriter>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    let writer = JsonlWriter::new(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to open audit log '{}': {}",
            path.display(),
            e
        ))
    })?;
    Ok(Arc::new(writer))
}
