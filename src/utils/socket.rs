//! Local agent socket hygiene
//!
//! The tunnel exposes its agent socket inside a private per-process
//! directory. Stale sockets are replaced, symlinks are never followed, and
//! the socket itself is only reachable by its owner.

use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// File name of the tunnel socket inside its session directory
pub const SOCKET_FILE_NAME: &str = "agent.sock";

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("Refusing to replace symlink at {path}")]
    SymlinkDetected { path: String },

    #[error("Failed to inspect {path}: {source}")]
    Metadata { path: String, source: io::Error },

    #[error("Failed to remove stale socket at {path}: {source}")]
    Remove { path: String, source: io::Error },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir { path: String, source: io::Error },

    #[error("Failed to set permissions on {path}: {source}")]
    Permission { path: String, source: io::Error },
}

impl From<SocketError> for crate::Error {
    fn from(e: SocketError) -> Self {
        crate::Error::Socket(e.to_string())
    }
}

/// Socket path for the tunnel of process `pid` under `base_dir`
///
/// `base_dir` defaults to the system temporary directory.
pub fn session_socket_path(base_dir: Option<&Path>, pid: u32) -> PathBuf {
    let base = base_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);
    base.join(format!("{}-{}", crate::NAME, pid))
        .join(SOCKET_FILE_NAME)
}

/// Remove whatever sits at `path`, unless it is a symlink
pub fn remove_stale_socket(path: &Path) -> Result<(), SocketError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => Err(SocketError::SymlinkDetected {
            path: path.display().to_string(),
        }),
        Ok(_) => fs::remove_file(path).map_err(|e| SocketError::Remove {
            path: path.display().to_string(),
            source: e,
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SocketError::Metadata {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Create the parent of `path` with mode 0700 if it is missing
pub fn ensure_private_parent(path: &Path) -> Result<(), SocketError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(parent)
        .map_err(|e| SocketError::CreateDir {
            path: parent.display().to_string(),
            source: e,
        })
}

/// Restrict a freshly bound socket to its owner (0600)
pub fn set_socket_permissions(path: &Path) -> Result<(), SocketError> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
        SocketError::Permission {
            path: path.display().to_string(),
            source: e,
        }
    })
}

/// Get `path` ready for `bind`
///
/// Call `set_socket_permissions` once the socket exists.
pub fn prepare_socket_path(path: &Path) -> Result<(), SocketError> {
    remove_stale_socket(path)?;
    ensure_private_parent(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn test_session_socket_path() {
        let path = session_socket_path(Some(Path::new("/run/user/1000")), 4242);
        assert_eq!(
            path,
            PathBuf::from("/run/user/1000/socketauth-4242/agent.sock")
        );

        let tmp = session_socket_path(None, 1);
        assert!(tmp.starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_remove_stale_socket_missing_is_ok() {
        let dir = tempdir().unwrap();
        assert!(remove_stale_socket(&dir.path().join("none.sock")).is_ok());
    }

    #[test]
    fn test_remove_stale_socket_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        fs::write(&path, b"stale").unwrap();
        remove_stale_socket(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_stale_socket_refuses_symlink() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("agent.sock");
        fs::write(&target, b"keep me").unwrap();
        symlink(&target, &link).unwrap();

        let result = remove_stale_socket(&link);
        assert!(matches!(result, Err(SocketError::SymlinkDetected { .. })));
        assert!(link.symlink_metadata().is_ok());
        assert!(target.exists());
    }

    #[test]
    fn test_ensure_private_parent_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("socketauth-1").join(SOCKET_FILE_NAME);
        ensure_private_parent(&path).unwrap();

        let mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_set_socket_permissions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        fs::write(&path, b"").unwrap();
        set_socket_permissions(&path).unwrap();
        let perms = fs::metadata(&path).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }

    #[test]
    fn test_prepare_socket_path() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("old").join("agent.sock");
        fs::create_dir(dir.path().join("old")).unwrap();
        fs::write(&existing, b"old").unwrap();
        prepare_socket_path(&existing).unwrap();
        assert!(!existing.exists());

        let fresh = dir.path().join("new").join("agent.sock");
        prepare_socket_path(&fresh).unwrap();
        assert!(fresh.parent().unwrap().is_dir());
    }
}
