//! Backend SSH agent location
//!
//! The backend is the real agent holding private keys, normally the
//! gateway host's `SSH_AUTH_SOCK`. Every gateway request dials it afresh.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::trace;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the backend agent listens and how long to wait for it
#[derive(Debug, Clone)]
pub struct Upstream {
    socket_path: PathBuf,
    connect_timeout: Duration,
}

impl Upstream {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether something exists at the socket path right now
    pub fn is_present(&self) -> bool {
        self.socket_path.exists()
    }

    /// Dial the backend agent
    ///
    /// Both a timeout and a refused connection map to
    /// [`Error::UpstreamNotAvailable`].
    pub async fn connect(&self) -> Result<UnixStream> {
        let dial = UnixStream::connect(&self.socket_path);
        let stream = match tokio::time::timeout(self.connect_timeout, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::UpstreamNotAvailable(format!(
                    "Failed to connect to backend agent at {}: {}",
                    self.socket_path.display(),
                    e
                )));
            }
            Err(_) => {
                return Err(Error::UpstreamNotAvailable(format!(
                    "Backend agent at {} did not accept within {:?}",
                    self.socket_path.display(),
                    self.connect_timeout
                )));
            }
        };

        trace!(socket_path = %self.socket_path.display(), "Connected to backend agent");
        Ok(stream)
    }
}
