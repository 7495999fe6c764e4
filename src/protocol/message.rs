//! SSH Agent Protocol message types and parsing

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ssh_key::{Fingerprint, HashAlg, PublicKey};

/// Maximum number of identities allowed in a single message.
/// This prevents malicious agents from causing excessive memory allocation.
const MAX_IDENTITIES: u32 = 10000;

/// Maximum size for a single key blob or comment (16 MB).
const MAX_BLOB_SIZE: u32 = 16 * 1024 * 1024;

/// SSH Agent message types
///
/// Tags outside the standard set are kept as `Unknown` so that every match
/// over a message type stays exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Requests from client
    RequestIdentities,
    SignRequest,
    AddIdentity,
    RemoveIdentity,
    RemoveAllIdentities,
    AddIdConstrained,
    AddSmartcardKey,
    RemoveSmartcardKey,
    Lock,
    Unlock,
    AddSmartcardKeyConstrained,
    Extension,

    // Responses from agent
    Failure,
    Success,
    IdentitiesAnswer,
    SignResponse,
    ExtensionFailure,

    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            11 => MessageType::RequestIdentities,
            13 => MessageType::SignRequest,
            17 => MessageType::AddIdentity,
            18 => MessageType::RemoveIdentity,
            19 => MessageType::RemoveAllIdentities,
            25 => MessageType::AddIdConstrained,
            20 => MessageType::AddSmartcardKey,
            21 => MessageType::RemoveSmartcardKey,
            22 => MessageType::Lock,
            23 => MessageType::Unlock,
            26 => MessageType::AddSmartcardKeyConstrained,
            27 => MessageType::Extension,
            5 => MessageType::Failure,
            6 => MessageType::Success,
            12 => MessageType::IdentitiesAnswer,
            14 => MessageType::SignResponse,
            28 => MessageType::ExtensionFailure,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::RequestIdentities => 11,
            MessageType::SignRequest => 13,
            MessageType::AddIdentity => 17,
            MessageType::RemoveIdentity => 18,
            MessageType::RemoveAllIdentities => 19,
            MessageType::AddIdConstrained => 25,
            MessageType::AddSmartcardKey => 20,
            MessageType::RemoveSmartcardKey => 21,
            MessageType::Lock => 22,
            MessageType::Unlock => 23,
            MessageType::AddSmartcardKeyConstrained => 26,
            MessageType::Extension => 27,
            MessageType::Failure => 5,
            MessageType::Success => 6,
            MessageType::IdentitiesAnswer => 12,
            MessageType::SignResponse => 14,
            MessageType::ExtensionFailure => 28,
            MessageType::Unknown(tag) => tag,
        }
    }
}

impl MessageType {
    /// Get the message type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            // Client requests (SSH_AGENTC_*)
            MessageType::RequestIdentities => "SSH_AGENTC_REQUEST_IDENTITIES",
            MessageType::SignRequest => "SSH_AGENTC_SIGN_REQUEST",
            MessageType::AddIdentity => "SSH_AGENTC_ADD_IDENTITY",
            MessageType::RemoveIdentity => "SSH_AGENTC_REMOVE_IDENTITY",
            MessageType::RemoveAllIdentities => "SSH_AGENTC_REMOVE_ALL_IDENTITIES",
            MessageType::AddIdConstrained => "SSH_AGENTC_ADD_ID_CONSTRAINED",
            MessageType::AddSmartcardKey => "SSH_AGENTC_ADD_SMARTCARD_KEY",
            MessageType::RemoveSmartcardKey => "SSH_AGENTC_REMOVE_SMARTCARD_KEY",
            MessageType::Lock => "SSH_AGENTC_LOCK",
            MessageType::Unlock => "SSH_AGENTC_UNLOCK",
            MessageType::AddSmartcardKeyConstrained => "SSH_AGENTC_ADD_SMARTCARD_KEY_CONSTRAINED",
            MessageType::Extension => "SSH_AGENTC_EXTENSION",
            // Agent responses (SSH_AGENT_*)
            MessageType::Failure => "SSH_AGENT_FAILURE",
            MessageType::Success => "SSH_AGENT_SUCCESS",
            MessageType::IdentitiesAnswer => "SSH_AGENT_IDENTITIES_ANSWER",
            MessageType::SignResponse => "SSH_AGENT_SIGN_RESPONSE",
            MessageType::ExtensionFailure => "SSH_AGENT_EXTENSION_FAILURE",
            MessageType::Unknown(_) => "UNKNOWN",
        }
    }

    /// Generic status replies that are valid answers to any request
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            MessageType::Failure | MessageType::Success | MessageType::ExtensionFailure
        )
    }
}

/// An SSH key identity from the agent
#[derive(Debug, Clone)]
pub struct Identity {
    /// Raw public key blob
    pub key_blob: Bytes,
    /// Comment for display and scope decoding; invalid UTF-8 is replaced
    pub comment: String,
    /// Comment exactly as the agent sent it
    pub raw_comment: Bytes,
    /// Parsed public key (if parsing succeeded)
    pub public_key: Option<PublicKey>,
}

impl Identity {
    /// Parse an identity from key blob and comment
    pub fn new(key_blob: Bytes, comment: String) -> Self {
        let raw_comment = Bytes::from(comment.clone().into_bytes());
        let public_key = PublicKey::from_bytes(&key_blob).ok();
        Self {
            key_blob,
            comment,
            raw_comment,
            public_key,
        }
    }

    /// Build from wire fields, keeping the comment bytes untouched
    pub fn from_wire(key_blob: Bytes, raw_comment: Bytes) -> Self {
        let comment = String::from_utf8_lossy(&raw_comment).into_owned();
        let public_key = PublicKey::from_bytes(&key_blob).ok();
        Self {
            key_blob,
            comment,
            raw_comment,
            public_key,
        }
    }

    /// Get the fingerprint of this key
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.public_key
            .as_ref()
            .map(|k| k.fingerprint(HashAlg::Sha256))
    }

    /// Fingerprint as a display string, or a placeholder for unparsable blobs
    pub fn fingerprint_string(&self) -> String {
        self.fingerprint()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "<unparsed key>".to_string())
    }

    /// Get the key type as a string
    pub fn key_type(&self) -> Option<String> {
        self.public_key
            .as_ref()
            .map(|k| k.algorithm().as_str().to_string())
    }
}

/// SSH Agent protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessage {
    /// Message type
    pub msg_type: MessageType,
    /// Raw message payload (excluding type byte)
    pub payload: Bytes,
}

impl AgentMessage {
    /// Create a new message
    pub fn new(msg_type: MessageType, payload: Bytes) -> Self {
        Self { msg_type, payload }
    }

    /// Create a failure response
    pub fn failure() -> Self {
        Self {
            msg_type: MessageType::Failure,
            payload: Bytes::new(),
        }
    }

    /// Create a success response
    pub fn success() -> Self {
        Self {
            msg_type: MessageType::Success,
            payload: Bytes::new(),
        }
    }

    /// Parse identities from an IdentitiesAnswer message
    pub fn parse_identities(&self) -> Result<Vec<Identity>> {
        if self.msg_type != MessageType::IdentitiesAnswer {
            return Err(Error::InvalidMessage(format!(
                "Expected IdentitiesAnswer, got {:?}",
                self.msg_type
            )));
        }

        let mut buf = &self.payload[..];
        if buf.remaining() < 4 {
            return Err(Error::InvalidMessage("Message too short".to_string()));
        }

        let count = buf.get_u32();
        if count > MAX_IDENTITIES {
            return Err(Error::InvalidMessage(format!(
                "Identity count {} exceeds maximum allowed {}",
                count, MAX_IDENTITIES
            )));
        }

        let mut identities = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_blob = read_string(&mut buf, "Key blob")?;
            let comment = read_string(&mut buf, "Comment")?;
            identities.push(Identity::from_wire(key_blob, comment));
        }

        Ok(identities)
    }

    /// Build an IdentitiesAnswer message from a list of identities
    pub fn build_identities_answer(identities: &[Identity]) -> Self {
        let mut payload = BytesMut::new();
        let count = identities.len() as u32;
        payload.put_u32(count);

        for identity in identities {
            payload.put_u32(identity.key_blob.len() as u32);
            payload.put_slice(&identity.key_blob);
            payload.put_u32(identity.raw_comment.len() as u32);
            payload.put_slice(&identity.raw_comment);
        }

        Self {
            msg_type: MessageType::IdentitiesAnswer,
            payload: payload.freeze(),
        }
    }

    /// Parse the key blob from a SignRequest message
    pub fn parse_sign_request_key(&self) -> Result<Bytes> {
        if self.msg_type != MessageType::SignRequest {
            return Err(Error::InvalidMessage(format!(
                "Expected SignRequest, got {:?}",
                self.msg_type
            )));
        }

        let mut buf = &self.payload[..];
        if buf.remaining() < 4 {
            return Err(Error::InvalidMessage("Message too short".to_string()));
        }
        read_string(&mut buf, "Key blob")
    }

    /// Encode the message to bytes (including length prefix)
    pub fn encode(&self) -> Bytes {
        let total_len = 1 + self.payload.len();
        let mut buf = BytesMut::with_capacity(4 + total_len);
        buf.put_u32(total_len as u32);
        buf.put_u8(self.msg_type.into());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a message from bytes (excluding length prefix)
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidMessage("Empty message".to_string()));
        }

        let msg_type = MessageType::from(data[0]);
        let payload = Bytes::copy_from_slice(&data[1..]);

        Ok(Self { msg_type, payload })
    }
}

/// Read one length-prefixed SSH string
fn read_string(buf: &mut &[u8], what: &str) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(Error::InvalidMessage(
            "Unexpected end of message".to_string(),
        ));
    }
    let len = buf.get_u32();
    if len > MAX_BLOB_SIZE {
        return Err(Error::InvalidMessage(format!(
            "{} size {} exceeds maximum allowed {}",
            what, len, MAX_BLOB_SIZE
        )));
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(Error::InvalidMessage(format!("{} truncated", what)));
    }
    let data = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(data)
}
