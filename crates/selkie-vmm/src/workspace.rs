//! Per-guest on-disk workspace
//!
//! TigerStyle: Deterministic paths, clean-slate recreate, best-effort removal.
//!
//! Every guest owns one directory under the driver state root, named after
//! the guest. The control socket and the console log files live inside it
//! under fixed names, so every path is derivable from `(state_root, name)`
//! alone and never needs to be persisted.

use std::path::{Path, PathBuf};
use tracing::warn;

/// Fixed name of the control socket inside the workspace
pub const WORKSPACE_SOCKET_FILENAME: &str = "firecracker.socket";

/// Fixed name of the stdout log inside the workspace
pub const WORKSPACE_STDOUT_LOG_FILENAME: &str = "stdout.log";

/// Fixed name of the stderr log inside the workspace
pub const WORKSPACE_STDERR_LOG_FILENAME: &str = "stderr.log";

/// The per-guest directory and the well-known paths inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestWorkspace {
    dir: PathBuf,
}

impl GuestWorkspace {
    /// Derive the workspace for a guest name under a driver state root
    pub fn new(state_root: impl AsRef<Path>, guest_name: &str) -> Self {
        Self {
            dir: state_root.as_ref().join(guest_name),
        }
    }

    /// The workspace directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the VMM control socket
    pub fn api_socket(&self) -> PathBuf {
        self.dir.join(WORKSPACE_SOCKET_FILENAME)
    }

    /// Path of the child's stdout log
    pub fn stdout_log(&self) -> PathBuf {
        self.dir.join(WORKSPACE_STDOUT_LOG_FILENAME)
    }

    /// Path of the child's stderr log
    pub fn stderr_log(&self) -> PathBuf {
        self.dir.join(WORKSPACE_STDERR_LOG_FILENAME)
    }

    /// Delete and recreate the directory, guaranteeing a clean slate.
    ///
    /// Called at the start of every guest start sequence so stale sockets
    /// or logs from a previous session can never be mistaken for live ones.
    pub async fn recreate(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Remove the control socket, best-effort.
    pub async fn remove_socket(&self) {
        let socket = self.api_socket();
        if let Err(e) = tokio::fs::remove_file(&socket).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %socket.display(), error = %e, "could not remove control socket");
            }
        }
    }

    /// Remove the whole workspace directory, best-effort.
    ///
    /// Cleanup after shutdown/destroy must not fail the operation; a
    /// directory that cannot be removed is logged and left behind.
    pub async fn remove(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.dir.display(), error = %e, "could not remove guest workspace");
            }
        }
    }
}
