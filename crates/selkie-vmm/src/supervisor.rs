//! Supervision of the external VMM child process
//!
//! TigerStyle: One supervised process per guest, explicit abort/reap paths.
//!
//! The supervisor owns exactly one child process: it spawns the VMM binary
//! with the control socket as its API argument, wires the console (a pty
//! pair when interactive access is wanted, log files otherwise), waits for
//! the asynchronously-created control socket with a bounded backoff, and
//! later either force-kills or reaps the child.

use crate::error::{VmmError, VmmResult};
use crate::workspace::GuestWorkspace;
use crate::{CHANNEL_WAIT_BUDGET_MS_DEFAULT, CHANNEL_WAIT_FIRST_BACKOFF_MS};
use serde::{Deserialize, Serialize};
use std::os::fd::OwnedFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

/// How the child's standard output is wired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleMode {
    /// Redirect stdout to the workspace log file
    LogFile,
    /// Wire stdin/stdout to a pty pair and record the attachable device path
    Pty,
}

/// Budget for waiting on the control socket to appear.
///
/// The VMM creates its API socket asynchronously after spawn; this bounds
/// the existence poll with a capped exponential backoff. Both knobs are
/// injectable so tests can run with millisecond budgets instead of sleeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelBudget {
    /// First backoff delay in milliseconds (doubles on every miss)
    pub first_backoff_ms: u64,
    /// Total wall-clock budget in milliseconds
    pub budget_ms: u64,
}

impl Default for ChannelBudget {
    fn default() -> Self {
        Self {
            first_backoff_ms: CHANNEL_WAIT_FIRST_BACKOFF_MS,
            budget_ms: CHANNEL_WAIT_BUDGET_MS_DEFAULT,
        }
    }
}

impl ChannelBudget {
    /// Create a budget with the default backoff and total wait
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total wall-clock budget
    pub fn with_budget_ms(mut self, budget_ms: u64) -> Self {
        self.budget_ms = budget_ms;
        self
    }
}

/// Console pty retained for the lifetime of the supervised process.
///
/// The child holds the primary end as stdin/stdout; the secondary end is
/// kept open here so the line stays usable until a console client attaches.
#[derive(Debug)]
struct ConsolePty {
    path: PathBuf,
    _secondary: OwnedFd,
}

/// A supervised VMM child process
#[derive(Debug)]
pub struct VmmProcess {
    child: Child,
    console: Option<ConsolePty>,
}

impl VmmProcess {
    /// OS process id, if the child has not been reaped yet
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Device path of the console pty, if the process was launched with one
    pub fn console_path(&self) -> Option<&Path> {
        self.console.as_ref().map(|c| c.path.as_path())
    }

    /// Forcibly terminate the process.
    ///
    /// Used on destroy and on any failure mid start-sequence; does not give
    /// the child a chance to exit gracefully.
    pub async fn abort(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill VMM process");
        }
    }

    /// Wait until the process has exited and return its exit status.
    ///
    /// Only called after a confirmed graceful shutdown, where the child is
    /// already on its way out, so the unbounded wait is acceptable.
    pub async fn reap(&mut self) -> VmmResult<std::process::ExitStatus> {
        self.child.wait().await.map_err(|e| VmmError::WaitFailed {
            reason: e.to_string(),
        })
    }
}

/// Spawn the VMM binary for one guest.
///
/// The child is invoked as `<binary> --api-sock <socket>`. Stderr always
/// goes to the workspace stderr log; stdout goes either to the stdout log
/// or to a freshly allocated pty whose attachable end is recorded on the
/// returned handle.
pub async fn launch(
    binary: &Path,
    workspace: &GuestWorkspace,
    console: ConsoleMode,
) -> VmmResult<VmmProcess> {
    let spawn_failed = |reason: String| VmmError::SpawnFailed {
        binary: binary.display().to_string(),
        reason,
    };

    let stderr_log = open_log(&workspace.stderr_log())
        .map_err(|e| spawn_failed(format!("cannot open stderr log: {}", e)))?;

    let mut cmd = Command::new(binary);
    cmd.arg("--api-sock")
        .arg(workspace.api_socket())
        .stderr(Stdio::from(stderr_log))
        .kill_on_drop(true);

    let console_pty = match console {
        ConsoleMode::Pty => {
            let pty = nix::pty::openpty(None, None)
                .map_err(|e| spawn_failed(format!("cannot allocate console pty: {}", e)))?;
            let path = nix::unistd::ttyname(&pty.slave)
                .map_err(|e| spawn_failed(format!("cannot resolve console pty name: {}", e)))?;

            let primary_in = pty
                .master
                .try_clone()
                .map_err(|e| spawn_failed(format!("cannot duplicate console pty: {}", e)))?;
            cmd.stdin(Stdio::from(primary_in));
            cmd.stdout(Stdio::from(pty.master));

            debug!(console = %path.display(), "console pty allocated");

            Some(ConsolePty {
                path,
                _secondary: pty.slave,
            })
        }
        ConsoleMode::LogFile => {
            let stdout_log = open_log(&workspace.stdout_log())
                .map_err(|e| spawn_failed(format!("cannot open stdout log: {}", e)))?;
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::from(stdout_log));
            None
        }
    };

    let child = cmd.spawn().map_err(|e| spawn_failed(e.to_string()))?;

    debug!(
        binary = %binary.display(),
        pid = child.id(),
        socket = %workspace.api_socket().display(),
        "VMM process spawned"
    );

    Ok(VmmProcess {
        child,
        console: console_pty,
    })
}

fn open_log(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

/// Poll for the control socket to exist, with capped exponential backoff.
///
/// The first delay doubles on every miss and each sleep is clipped to the
/// remaining budget, so the total wall-clock spent never exceeds
/// `budget.budget_ms`.
pub async fn wait_for_channel(path: &Path, budget: &ChannelBudget) -> VmmResult<()> {
    let deadline = Instant::now() + Duration::from_millis(budget.budget_ms);
    let mut backoff = Duration::from_millis(budget.first_backoff_ms.max(1));

    loop {
        if path.exists() {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(VmmError::ChannelTimeout {
                path: path.display().to_string(),
                budget_ms: budget.budget_ms,
            });
        }

        tokio::time::sleep(backoff.min(deadline - now)).await;
        backoff *= 2;
    }
}

/// Relax filesystem permissions on the control socket so a different
/// effective user than the spawning one can issue RPCs.
///
/// Best-effort by contract: a failure is logged and swallowed, and a truly
/// unusable socket surfaces later as a transport error.
pub async fn relax_channel_permissions(path: &Path) {
    match tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)).await {
        Ok(()) => debug!(channel = %path.display(), "control socket permissions relaxed"),
        Err(e) => warn!(
            channel = %path.display(),
            error = %e,
            "could not relax control socket permissions"
        ),
    }
}
