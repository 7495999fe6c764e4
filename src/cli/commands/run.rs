//! Run command - wrap a command with a tunneled SSH agent

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cli::args::RunArgs;
use crate::cli::exit_code::ExitCode;
use crate::config::{ConfigFile, ExpandedClientConfig, parse_duration};
use crate::tunnel::{TunnelClient, TunnelListener, TunnelOptions, TunnelSession, ssh_args};
use crate::utils::socket::session_socket_path;

/// Environment variable naming the gateway; never passed to the child
pub const URL_ENV: &str = "SOCKETAUTH_URL";

/// Merge command line flags over the `[client]` section
fn tunnel_options(args: &RunArgs, client: &ExpandedClientConfig) -> Result<(String, TunnelOptions)> {
    let Some(url) = args.url.clone().or_else(|| client.url.clone()) else {
        bail!("No gateway URL: set {}, pass --url or add [client].url", URL_ENV);
    };
    let timeout = match &args.timeout {
        Some(t) => parse_duration(t).context("Invalid --timeout")?,
        None => client.timeout,
    };
    let options = TunnelOptions {
        username: args.username.clone().or_else(|| client.username.clone()),
        password: client.password.clone(),
        timeout,
        max_response_size: client.max_response_size,
    };
    Ok((url, options))
}

/// Execute the run command and return the wrapped command's exit code
pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<i32> {
    let config = ConfigFile::resolve(config_path.as_deref()).context("Failed to load configuration")?;
    let client_config = config
        .config
        .client
        .expand()
        .context("Invalid [client] configuration")?;
    let (url, options) = tunnel_options(&args, &client_config)?;

    let client = TunnelClient::new(&url, options).context("Failed to set up tunnel client")?;
    debug!(url = %client.url(), credentials = client.has_credentials(), "Tunnel client ready");

    let socket_dir = args.socket_dir.clone().or(client_config.socket_dir);
    let socket_path = session_socket_path(socket_dir.as_deref(), std::process::id());

    // Declared before the listener so the directory outlives the socket file
    let _dir_guard = scopeguard::guard(socket_path.parent().map(Path::to_path_buf), |dir| {
        if let Some(dir) = dir
            && let Err(e) = std::fs::remove_dir(&dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %dir.display(), error = %e, "Failed to remove socket directory");
        }
    });
    let listener = TunnelListener::bind(&socket_path).context("Failed to create tunnel socket")?;

    let session = TunnelSession::new(Arc::new(client), ssh_args(&args.command).unwrap_or_default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        listener
            .run(
                move |stream| {
                    let session = session.clone();
                    async move { session.handle(stream).await }
                },
                shutdown_rx,
            )
            .await
    });

    let code = match spawn(&args.command, &socket_path) {
        Ok(child) => {
            let status = wait_forwarding_signals(child).await?;
            exit_code_of(status)
        }
        Err(e) => {
            error!(command = ?args.command, error = %e, "Failed to start command");
            i32::from(u8::from(ExitCode::SpawnError))
        }
    };

    let _ = shutdown_tx.send(true);
    match server.await {
        Ok(Err(e)) => warn!(error = %e, "Tunnel socket stopped with error"),
        Err(e) => warn!(error = %e, "Tunnel socket task failed"),
        Ok(Ok(())) => {}
    }

    Ok(code)
}

fn spawn(command: &[String], socket_path: &Path) -> std::io::Result<Child> {
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;

    info!(command = %program, socket = %socket_path.display(), "Starting command");
    Command::new(program)
        .args(rest)
        .env("SSH_AUTH_SOCK", socket_path)
        .env_remove(URL_ENV)
        .spawn()
}

/// Wait for `child`, relaying SIGTERM and SIGHUP to it
///
/// SIGINT reaches the child through the terminal's process group, so it is
/// only absorbed here.
async fn wait_forwarding_signals(mut child: Child) -> Result<ExitStatus> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    loop {
        tokio::select! {
            status = child.wait() => {
                return status.context("Failed to wait for command");
            }
            _ = sigterm.recv() => forward_signal(&child, libc::SIGTERM),
            _ = sighup.recv() => forward_signal(&child, libc::SIGHUP),
            _ = sigint.recv() => debug!("Interrupted; waiting for command to exit"),
        }
    }
}

fn forward_signal(child: &Child, signal: libc::c_int) {
    let Some(pid) = child.id() else {
        return;
    };
    debug!(pid = pid, signal = signal, "Forwarding signal to command");
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        warn!(
            pid = pid,
            error = %std::io::Error::last_os_error(),
            "Failed to forward signal"
        );
    }
}

/// Shell-style exit code: the status code, or 128 + signal number
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}
