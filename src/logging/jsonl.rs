//! JSONL (JSON Lines) audit log
//!
//! Each gateway decision is written as a single JSON object on one line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::protocol::Identity;
use crate::ssh::AuthorizationContext;

/// Log event kinds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogEventKind {
    /// Gateway started listening
    ServerStart,
    /// Gateway stopped
    ServerStop,
    /// Authenticated tunnel request accepted
    TunnelRequest,
    /// Basic-Auth missing or rejected
    AuthFailure,
    /// Identity list returned to a caller
    IdentitiesResponse,
    /// Sign request forwarded to the backend
    SignRequest,
    /// Key hidden from a listing by its scope
    KeyFiltered,
    /// Error occurred
    Error,
}

impl std::fmt::Display for LogEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogEventKind::ServerStart => write!(f, "server_start"),
            LogEventKind::ServerStop => write!(f, "server_stop"),
            LogEventKind::TunnelRequest => write!(f, "tunnel_request"),
            LogEventKind::AuthFailure => write!(f, "auth_failure"),
            LogEventKind::IdentitiesResponse => write!(f, "identities_response"),
            LogEventKind::SignRequest => write!(f, "sign_request"),
            LogEventKind::KeyFiltered => write!(f, "key_filtered"),
            LogEventKind::Error => write!(f, "error"),
        }
    }
}

/// A structured log event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Timestamp of the event
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Kind of event
    pub kind: LogEventKind,

    /// Listen address or endpoint path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Authenticated (or attempted) Basic-Auth username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// SSH key fingerprint (SHA256 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// SSH key comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// SSH key type (e.g., "ssh-ed25519", "ssh-rsa")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,

    /// Reason for the decision or action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Number of keys (for identity responses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_count: Option<u32>,

    /// Number of keys filtered out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered_count: Option<u32>,

    /// Error message (for error events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Authorization context the event happened under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEvent {
    /// Create a new log event with the current timestamp
    pub fn new(kind: LogEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            endpoint: None,
            username: None,
            fingerprint: None,
            comment: None,
            key_type: None,
            reason: None,
            key_count: None,
            filtered_count: None,
            error: None,
            context: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach the key fields of an identity
    pub fn with_identity(mut self, identity: &Identity) -> Self {
        self.fingerprint = identity.fingerprint().map(|f| f.to_string());
        self.key_type = identity.key_type();
        if !identity.comment.is_empty() {
            self.comment = Some(identity.comment.clone());
        }
        self
    }

    /// Attach the authorization context
    pub fn with_context(mut self, context: &AuthorizationContext) -> Self {
        self.context = serde_json::to_value(context).ok();
        self
    }

    pub fn server_start(endpoint: impl Into<String>) -> Self {
        Self::new(LogEventKind::ServerStart).with_endpoint(endpoint)
    }

    pub fn server_stop(endpoint: impl Into<String>) -> Self {
        Self::new(LogEventKind::ServerStop).with_endpoint(endpoint)
    }

    pub fn tunnel_request(username: impl Into<String>, context: &AuthorizationContext) -> Self {
        Self::new(LogEventKind::TunnelRequest)
            .with_username(username)
            .with_context(context)
    }

    pub fn auth_failure(reason: impl Into<String>) -> Self {
        Self::new(LogEventKind::AuthFailure).with_reason(reason)
    }

    pub fn identities_response(context: &AuthorizationContext, allowed: usize, filtered: usize) -> Self {
        let mut event = Self::new(LogEventKind::IdentitiesResponse).with_context(context);
        event.key_count = Some(allowed as u32);
        event.filtered_count = Some(filtered as u32);
        event
    }

    pub fn sign_request(identity: &Identity, context: &AuthorizationContext) -> Self {
        Self::new(LogEventKind::SignRequest)
            .with_identity(identity)
            .with_context(context)
    }

    pub fn key_filtered(identity: &Identity, context: &AuthorizationContext) -> Self {
        Self::new(LogEventKind::KeyFiltered)
            .with_identity(identity)
            .with_context(context)
            .with_reason("scope does not cover requested repository")
    }

    /// Create an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogEventKind::Error).with_error(message)
    }

    /// Serialize the event to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// JSONL file writer with thread-safe buffered output
pub struct JsonlWriter {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlWriter {
    /// Create a new JSONL writer
    ///
    /// Opens the file for appending. Creates the file if it doesn't exist.
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Write a log event to the file
    pub fn write(&self, event: &LogEvent) -> std::io::Result<()> {
        let json = event
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Flush any buffered data to the file
    pub fn flush(&self) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writer.flush()
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
