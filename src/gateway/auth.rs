//! Basic-Auth gate for the gateway

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::fmt;

/// Decoded Basic-Auth credentials
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Outcome of reading the Authorization header
#[derive(Debug, PartialEq, Eq)]
pub enum AuthHeader {
    /// No Authorization header at all
    Missing,
    /// Present but not a usable Basic credential
    Malformed,
    Basic(BasicCredentials),
}

impl AuthHeader {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return AuthHeader::Missing;
        };
        let Ok(value) = value.to_str() else {
            return AuthHeader::Malformed;
        };
        parse_basic(value).map_or(AuthHeader::Malformed, AuthHeader::Basic)
    }
}

fn parse_basic(value: &str) -> Option<BasicCredentials> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Decides whether a username/password pair may use the gateway
pub trait CredentialCheck: Send + Sync {
    fn verify(&self, credentials: &BasicCredentials) -> bool;
}

/// Fixed username to password table
#[derive(Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.users.keys().collect();
        names.sort();
        f.debug_struct("StaticCredentials")
            .field("users", &names)
            .finish()
    }
}

impl CredentialCheck for StaticCredentials {
    fn verify(&self, credentials: &BasicCredentials) -> bool {
        match self.users.get(&credentials.username) {
            Some(expected) => constant_time_eq(&credentials.password, expected),
            None => {
                // Burn comparable time for unknown users
                let _ = constant_time_eq(&credentials.password, &credentials.password);
                false
            }
        }
    }
}

/// Compare two secrets without an early exit
pub fn constant_time_eq(left: &str, right: &str) -> bool {
    let left = left.as_bytes();
    let right = right.as_bytes();
    let max_len = left.len().max(right.len());

    let mut diff = left.len() ^ right.len();
    for i in 0..max_len {
        let l = *left.get(i).unwrap_or(&0);
        let r = *right.get(i).unwrap_or(&0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}
