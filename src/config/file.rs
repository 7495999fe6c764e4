//! Configuration file discovery and loading

use std::path::{Path, PathBuf};

use super::Config;

/// Configuration file wrapper with path information
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Path where the configuration was loaded from, `None` for defaults
    pub path: Option<PathBuf>,

    pub config: Config,
}

impl ConfigFile {
    /// Load `path` if given, else the first file found in the search paths,
    /// else the built-in defaults
    pub fn resolve(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(p) => load_config(p),
            None => match find_config_file() {
                Some(p) => load_config(&p),
                None => Ok(Self {
                    path: None,
                    config: Config::default(),
                }),
            },
        }
    }
}

/// Configuration file search path with description
#[derive(Debug, Clone)]
pub struct ConfigPath {
    pub path: PathBuf,
    /// Human-readable form for display
    pub description: &'static str,
}

const CONFIG_FILE_NAME: &str = "config.toml";

const APP_NAME: &str = "socketauth";

/// Configuration search paths in priority order
///
/// 1. `$XDG_CONFIG_HOME/socketauth/config.toml` (if env var set)
/// 2. `~/Library/Application Support/socketauth/config.toml` (macOS)
/// 3. `~/.config/socketauth/config.toml`
/// 4. `~/.socketauth.toml`
/// 5. `/etc/socketauth/config.toml`
pub fn config_search_paths() -> Vec<ConfigPath> {
    let mut paths = Vec::new();

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        paths.push(ConfigPath {
            path: PathBuf::from(xdg).join(APP_NAME).join(CONFIG_FILE_NAME),
            description: "$XDG_CONFIG_HOME/socketauth/config.toml",
        });
    }

    #[cfg(target_os = "macos")]
    if let Some(home) = dirs::home_dir() {
        paths.push(ConfigPath {
            path: home
                .join("Library/Application Support")
                .join(APP_NAME)
                .join(CONFIG_FILE_NAME),
            description: "~/Library/Application Support/socketauth/config.toml",
        });
    }

    if let Some(home) = dirs::home_dir() {
        let dotconfig = home.join(".config").join(APP_NAME).join(CONFIG_FILE_NAME);
        if !paths.iter().any(|p| p.path == dotconfig) {
            paths.push(ConfigPath {
                path: dotconfig,
                description: "~/.config/socketauth/config.toml",
            });
        }
        paths.push(ConfigPath {
            path: home.join(format!(".{}.toml", APP_NAME)),
            description: "~/.socketauth.toml",
        });
    }

    #[cfg(unix)]
    paths.push(ConfigPath {
        path: PathBuf::from("/etc").join(APP_NAME).join(CONFIG_FILE_NAME),
        description: "/etc/socketauth/config.toml",
    });

    paths
}

/// Find the configuration file in standard locations
pub fn find_config_file() -> Option<PathBuf> {
    for cp in config_search_paths() {
        if cp.path.is_file() {
            tracing::debug!(path = %cp.path.display(), "Found configuration file");
            return Some(cp.path);
        }
    }

    tracing::debug!("No configuration file found in standard locations");
    None
}

/// Load configuration from the specified path
pub fn load_config(path: &Path) -> crate::Result<ConfigFile> {
    tracing::debug!("Loading configuration from: {}", path.display());

    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read configuration file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to parse configuration file '{}': {}",
            path.display(),
            e
        ))
    })?;

    Ok(ConfigFile {
        path: Some(path.to_path_buf()),
        config,
    })
}
