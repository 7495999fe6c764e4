//! SSH Agent protocol framing
//!
//! `FrameBuffer` reassembles length-prefixed frames from arbitrarily chunked
//! input. `AgentCodec` reads and writes whole messages on async streams.

use crate::error::{Error, Result};
use crate::protocol::message::{AgentMessage, MessageType};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum message size (16MB, same as OpenSSH)
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Length prefix plus type tag
const HEADER_LEN: usize = 5;

/// Encode a frame from a type tag and body
pub fn encode_frame(msg_type: MessageType, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32((1 + body.len()) as u32);
    buf.put_u8(msg_type.into());
    buf.put_slice(body);
    buf.freeze()
}

/// Validate a declared frame length
fn check_length(len: u32) -> Result<()> {
    if len == 0 {
        return Err(Error::InvalidMessage("Zero-length message".to_string()));
    }
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "Message too large: {} bytes",
            len
        )));
    }
    Ok(())
}

/// Append-only accumulator for one direction of a connection
///
/// After every [`FrameBuffer::decode`] the buffer holds at most one
/// incomplete trailing frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed as frames
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Extract every complete frame, in arrival order
    ///
    /// Returns an error if a declared length is zero or exceeds
    /// [`MAX_MESSAGE_SIZE`]; the connection should be dropped in that case.
    pub fn decode(&mut self) -> Result<Vec<AgentMessage>> {
        let mut frames = Vec::new();
        while self.buf.len() >= HEADER_LEN {
            let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            check_length(len)?;
            let frame_len = 4 + len as usize;
            if self.buf.len() < frame_len {
                break;
            }
            let mut frame = self.buf.split_to(frame_len);
            frame.advance(4);
            let msg_type = MessageType::from(frame.get_u8());
            frames.push(AgentMessage::new(msg_type, frame.freeze()));
        }
        Ok(frames)
    }
}

/// Codec for reading and writing SSH agent messages
pub struct AgentCodec;

impl AgentCodec {
    /// Read a message from an async reader
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<AgentMessage>> {
        // Read length prefix (4 bytes)
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf);
        check_length(len)?;

        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;

        let msg = AgentMessage::decode(&buf)?;
        Ok(Some(msg))
    }

    /// Write a message to an async writer
    pub async fn write<W: AsyncWrite + Unpin>(writer: &mut W, msg: &AgentMessage) -> Result<()> {
        let encoded = msg.encode();
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }
}
