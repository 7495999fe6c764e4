//! Serve command - expose the local agent to tunnel clients

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use crate::agent::Upstream;
use crate::cli::args::ServeArgs;
use crate::config::{ConfigFile, ExpandedServerConfig, ServerConfig};
use crate::gateway::{Gateway, StaticCredentials};
use crate::logging::open_audit_log;

/// Merge command line flags over the `[server]` section
fn server_settings(args: &ServeArgs, mut server: ServerConfig) -> Result<ExpandedServerConfig> {
    if let Some(listen) = &args.listen {
        server.listen = listen.clone();
    }
    if let Some(path) = &args.path {
        server.path = path.clone();
    }
    if let Some(upstream) = &args.upstream {
        server.upstream = upstream.to_string_lossy().into_owned();
    }
    if let Some(log) = &args.log {
        server.log_path = Some(log.to_string_lossy().into_owned());
    }
    if let Some(max_body_size) = args.max_body_size {
        server.max_body_size = max_body_size;
    }
    server.expand().context("Invalid [server] configuration")
}

pub async fn execute(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = ConfigFile::resolve(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = &config.path {
        info!(path = %path.display(), "Using configuration file");
    }
    let settings = server_settings(&args, config.config.server)?;

    if settings.credentials.is_empty() {
        bail!("No credentials configured; add users to [server.credentials]");
    }
    let upstream = Upstream::new(&settings.upstream);
    if !upstream.is_present() {
        warn!(
            upstream = %upstream.socket_path().display(),
            "Backend agent socket does not exist yet"
        );
    }

    let credentials = StaticCredentials::new(settings.credentials);
    info!(users = credentials.len(), "Loaded gateway credentials");

    let mut gateway = Gateway::new(upstream, Arc::new(credentials))
        .with_path(settings.path)
        .with_max_body_size(settings.max_body_size);
    if let Some(log_path) = &settings.log_path {
        let audit = open_audit_log(log_path).context("Failed to open audit log")?;
        info!(log = %log_path.display(), "JSONL audit log enabled");
        gateway = gateway.with_audit(audit);
    }

    let listener = TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", settings.listen))?;

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received interrupt, stopping"),
            _ = sigterm.recv() => info!("Received SIGTERM, stopping"),
        }
    };

    gateway.serve(listener, shutdown).await?;
    Ok(())
}
