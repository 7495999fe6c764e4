//! Client-side bridge between a local agent connection and the gateway

use crate::error::Result;
use crate::protocol::FrameBuffer;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, trace};

use super::TunnelClient;
use super::peer::peer_ssh_args;

const READ_CHUNK_SIZE: usize = 8192;

/// Relays agent traffic for one wrapped command
///
/// Each burst of complete frames becomes one HTTP exchange. Exchanges on a
/// connection never overlap.
#[derive(Debug, Clone)]
pub struct TunnelSession {
    client: Arc<TunnelClient>,
    fallback_command: Arc<Vec<String>>,
}

impl TunnelSession {
    /// `fallback_command` is sent when the connecting peer is not ssh
    pub fn new(client: Arc<TunnelClient>, fallback_command: Vec<String>) -> Self {
        Self {
            client,
            fallback_command: Arc::new(fallback_command),
        }
    }

    /// Serve one accepted connection on the local socket
    pub async fn handle(&self, stream: UnixStream) -> Result<()> {
        let command = peer_ssh_args(&stream).unwrap_or_else(|| self.fallback_command.to_vec());
        debug!(command = ?command, "Agent client connected");
        self.relay(stream, &command).await
    }

    /// Relay frames from `stream` until it closes
    ///
    /// Returning an error drops `stream`, which closes the client side.
    pub async fn relay<S>(&self, mut stream: S, command: &[String]) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut frames = FrameBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                trace!(pending = frames.pending_len(), "Agent client disconnected");
                return Ok(());
            }
            frames.extend(&chunk[..n]);

            let messages = frames.decode()?;
            if messages.is_empty() {
                continue;
            }

            let mut body = BytesMut::new();
            for message in &messages {
                trace!(msg_type = message.msg_type.as_str(), "Tunneling request");
                body.extend_from_slice(&message.encode());
            }

            let response = self.client.exchange(body.freeze(), command).await?;
            stream.write_all(&response).await?;
            stream.flush().await?;
        }
    }
}
