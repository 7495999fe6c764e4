//! Config command - show or validate configuration

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::cli::args::ConfigArgs;
use crate::config::{Config, config_search_paths, find_config_file, load_config};
use crate::tunnel::{TunnelClient, TunnelOptions};

fn example_config() -> &'static str {
    r#"# socketauth configuration file

# Used by `socketauth run`
[client]
# Gateway endpoint; SOCKETAUTH_URL and --url take precedence
url = "https://gw.example.com/ssh-agent"
username = "ci"
password = "$SOCKETAUTH_PASSWORD"
# timeout = "60s"
# max_response_size = 10485760
# socket_dir = "$XDG_RUNTIME_DIR"

# Used by `socketauth serve`
[server]
listen = "127.0.0.1:3000"
path = "/ssh-agent"
upstream = "$SSH_AUTH_SOCK"
# max_body_size = 1048576
# log_path = "~/.local/state/socketauth/audit.jsonl"

[server.credentials]
ci = "$SOCKETAUTH_PASSWORD"

# Key comments select repositories:
#   user@laptop      no scope, offered for every repository
#   team_repo        only for team/repo (and paths below it)
#   team_            any repository under team/
#   team_*           glob, one path component under team/
# Any comment with `_` or `/` and no `@` or space is a scope, so keys
# commented `id_rsa` or with a file path are hidden from other repositories.
# Give such keys a `user@host` comment to offer them everywhere.
"#
}

/// Check what `socketauth run` and `serve` would check before starting
fn validate(config: &Config) -> Result<()> {
    let client = config.client.expand().context("Invalid [client] section")?;
    if let Some(url) = &client.url {
        TunnelClient::new(url, TunnelOptions::default()).context("Invalid [client].url")?;
    }
    if !config.server.path.starts_with('/') {
        bail!("[server].path must start with '/'");
    }
    Ok(())
}

fn print_paths() {
    println!("Config search paths (in priority order):");
    for (i, cp) in config_search_paths().iter().enumerate() {
        let exists = if cp.path.exists() { " [exists]" } else { "" };
        println!("  {}. {}{}", i + 1, cp.description, exists);
        println!("     {}", cp.path.display());
    }
}

fn print_value(value: &toml::Value, format: &str, source: Option<&Path>) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(value)?),
        _ => {
            if let Some(path) = source {
                println!("# Configuration from: {}", path.display());
                println!();
            }
            print!("{}", toml::to_string_pretty(value)?);
        }
    }
    Ok(())
}

pub fn execute(args: ConfigArgs, config_path: Option<PathBuf>) -> Result<()> {
    if args.paths {
        print_paths();
        return Ok(());
    }

    if args.example {
        if args.format == "json" {
            let value: toml::Value =
                toml::from_str(example_config()).context("Failed to parse example config")?;
            print_value(&value, "json", None)?;
        } else {
            print!("{}", example_config());
        }
        return Ok(());
    }

    let Some(path) = config_path.or_else(find_config_file) else {
        if args.validate {
            bail!("No configuration file found (use --paths to see search locations)");
        }
        println!("# No configuration file found");
        println!("# Use 'socketauth config --paths' to see search locations");
        println!();
        print!("{}", example_config());
        return Ok(());
    };

    let loaded = load_config(&path)?;
    if args.validate {
        validate(&loaded.config)
            .with_context(|| format!("Configuration file is invalid: {}", path.display()))?;
        println!("Configuration file is valid: {}", path.display());
        return Ok(());
    }

    // Print the effective configuration with defaults filled in
    let value = toml::Value::try_from(&loaded.config).context("Failed to render configuration")?;
    print_value(&value, &args.format, Some(&path))
}
