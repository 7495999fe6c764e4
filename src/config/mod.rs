//! Configuration for both ends of the tunnel
//!
//! One TOML file can carry a `[client]` section (used by `socketauth run`)
//! and a `[server]` section (used by `socketauth serve`). String values go
//! through environment variable and tilde expansion when the section is
//! used, so a client never needs the server's variables and vice versa.

mod file;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub use file::{ConfigFile, ConfigPath, config_search_paths, find_config_file, load_config};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Settings for `socketauth run`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Gateway endpoint, e.g. `https://gw.example.com/ssh-agent`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    /// Supports expansion, e.g. `$SOCKETAUTH_PASSWORD`
    #[serde(default)]
    pub password: Option<String>,

    /// Format: "60s", "2m", etc.
    #[serde(default = "default_client_timeout")]
    pub timeout: String,

    /// Largest gateway response accepted, in bytes
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,

    /// Where per-process socket directories are created (default: temp dir)
    #[serde(default)]
    pub socket_dir: Option<String>,
}

/// Settings for `socketauth serve`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// HTTP path of the tunnel endpoint
    #[serde(default = "default_path")]
    pub path: String,

    /// Path to the backend SSH agent socket
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Largest request body accepted, in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// JSONL audit log
    #[serde(default)]
    pub log_path: Option<String>,

    /// Basic-Auth users: username = password
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            timeout: default_client_timeout(),
            max_response_size: default_max_response_size(),
            socket_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            upstream: default_upstream(),
            max_body_size: default_max_body_size(),
            log_path: None,
            credentials: HashMap::new(),
        }
    }
}

fn default_client_timeout() -> String {
    "60s".to_string()
}

fn default_max_response_size() -> usize {
    crate::tunnel::DEFAULT_MAX_RESPONSE_SIZE
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_path() -> String {
    crate::gateway::DEFAULT_PATH.to_string()
}

fn default_upstream() -> String {
    "$SSH_AUTH_SOCK".to_string()
}

fn default_max_body_size() -> usize {
    crate::gateway::DEFAULT_MAX_BODY_SIZE
}

impl ClientConfig {
    /// Expand variables and parse the timeout
    pub fn expand(&self) -> crate::Result<ExpandedClientConfig> {
        let expand_opt = |v: &Option<String>| v.as_deref().map(expand_path).transpose();
        Ok(ExpandedClientConfig {
            url: expand_opt(&self.url)?,
            username: expand_opt(&self.username)?,
            password: expand_opt(&self.password)?,
            timeout: parse_duration(&self.timeout)?,
            max_response_size: self.max_response_size,
            socket_dir: expand_opt(&self.socket_dir)?.map(PathBuf::from),
        })
    }
}

impl ServerConfig {
    /// Expand variables in paths and credential values
    pub fn expand(&self) -> crate::Result<ExpandedServerConfig> {
        let mut credentials = HashMap::new();
        for (user, password) in &self.credentials {
            credentials.insert(user.clone(), expand_path(password)?);
        }

        Ok(ExpandedServerConfig {
            listen: self.listen.clone(),
            path: self.path.clone(),
            upstream: PathBuf::from(expand_path(&self.upstream)?),
            max_body_size: self.max_body_size,
            log_path: self
                .log_path
                .as_deref()
                .map(expand_path)
                .transpose()?
                .map(PathBuf::from),
            credentials,
        })
    }
}

/// Client settings ready to use
#[derive(Clone)]
pub struct ExpandedClientConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    pub max_response_size: usize,
    pub socket_dir: Option<PathBuf>,
}

impl std::fmt::Debug for ExpandedClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpandedClientConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("max_response_size", &self.max_response_size)
            .field("socket_dir", &self.socket_dir)
            .finish()
    }
}

/// Server settings ready to use
#[derive(Debug, Clone)]
pub struct ExpandedServerConfig {
    pub listen: String,
    pub path: String,
    pub upstream: PathBuf,
    pub max_body_size: usize,
    pub log_path: Option<PathBuf>,
    pub credentials: HashMap<String, String>,
}

/// Expand environment variables and tilde in a string
pub fn expand_path(path: &str) -> crate::Result<String> {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .map_err(|e| crate::Error::Config(format!("Failed to expand '{}': {}", path, e)))
}

/// Parse a duration string like "1h", "30m", "10s", "1d"
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::Config("Empty duration string".to_string()));
    }

    let (num_str, unit) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, "s"));

    let num: u64 = num_str.trim().parse().map_err(|e| {
        crate::Error::Config(format!("Invalid duration number '{}': {}", num_str, e))
    })?;

    let seconds = match unit.to_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => num,
        "m" | "min" | "mins" | "minute" | "minutes" => num * 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => num * 60 * 60,
        "d" | "day" | "days" => num * 60 * 60 * 24,
        _ => {
            return Err(crate::Error::Config(format!(
                "Unknown duration unit '{}' in '{}'",
                unit, s
            )));
        }
    };

    Ok(Duration::from_secs(seconds))
}
