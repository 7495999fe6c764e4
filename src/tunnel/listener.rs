//! Local agent socket handed to the wrapped command

use crate::error::{Error, Result};
use crate::utils::socket::{prepare_socket_path, set_socket_permissions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Unix socket that looks like an ordinary `SSH_AUTH_SOCK`
pub struct TunnelListener {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl TunnelListener {
    /// Create the socket at `socket_path`
    ///
    /// A stale file at the path is replaced, a symlink is refused, and the
    /// new socket is restricted to its owner.
    pub fn bind<P: AsRef<Path>>(socket_path: P) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        prepare_socket_path(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            Error::Socket(format!(
                "Failed to bind to socket at {}: {}",
                socket_path.display(),
                e
            ))
        })?;
        set_socket_permissions(&socket_path)?;

        debug!(path = %socket_path.display(), "Tunnel socket listening");
        Ok(Self {
            socket_path,
            listener,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown_rx` flips to true
    ///
    /// Each connection is handled on its own task. Handler errors end that
    /// connection only.
    pub async fn run<F, Fut>(&self, handler: F, mut shutdown_rx: watch::Receiver<bool>) -> Result<()>
    where
        F: Fn(UnixStream) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Tunnel socket shutting down");
                        break;
                    }
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            trace!("Accepted agent client");
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move {
                                if let Err(e) = handler(stream).await {
                                    warn!(error = %e, "Tunnel connection closed with error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept agent client");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl Drop for TunnelListener {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!(path = %self.socket_path.display(), "Removed tunnel socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.socket_path.display(),
                error = %e,
                "Failed to remove tunnel socket"
            ),
        }
    }
}
