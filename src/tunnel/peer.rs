//! Which ssh command is talking to the tunnel socket

use crate::ssh::is_ssh_program;
use tokio::net::UnixStream;
use tracing::trace;

/// ssh arguments of the process connected on `stream`, if it is ssh
#[cfg(target_os = "linux")]
pub fn peer_ssh_args(stream: &UnixStream) -> Option<Vec<String>> {
    let pid = stream.peer_cred().ok()?.pid()?;
    let raw = std::fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    let args = ssh_args_from_cmdline(&raw);
    trace!(pid = pid, is_ssh = args.is_some(), "Looked up agent client");
    args
}

#[cfg(not(target_os = "linux"))]
pub fn peer_ssh_args(_stream: &UnixStream) -> Option<Vec<String>> {
    trace!("Peer command lookup unsupported on this platform");
    None
}

/// Parse a NUL-separated `/proc/<pid>/cmdline` image
pub fn ssh_args_from_cmdline(raw: &[u8]) -> Option<Vec<String>> {
    let mut parts: Vec<String> = raw
        .split(|b| *b == 0)
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect();
    if parts.last().is_some_and(|s| s.is_empty()) {
        parts.pop();
    }
    ssh_args(&parts)
}

/// Arguments after the program name when `command` runs ssh
pub fn ssh_args(command: &[String]) -> Option<Vec<String>> {
    let (program, args) = command.split_first()?;
    is_ssh_program(program).then(|| args.to_vec())
}
