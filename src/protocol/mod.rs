//! SSH Agent Protocol implementation
//!
//! This module implements the SSH agent protocol as defined in:
//! https://datatracker.ietf.org/doc/html/draft-miller-ssh-agent

pub mod codec;
pub mod message;

pub use codec::{AgentCodec, FrameBuffer, MAX_MESSAGE_SIZE, encode_frame};
pub use message::{AgentMessage, Identity, MessageType};
