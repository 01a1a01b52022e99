//! VMM process supervision and control-plane plumbing for Selkie
//!
//! TigerStyle: Explicit lifecycle, bounded waits, typed failures.
//!
//! # Overview
//!
//! This crate owns the mechanics shared by every guest, with no knowledge
//! of guest definitions or lifecycle policy:
//!
//! - **ApiClient**: stateless HTTP-over-Unix-socket client for one VMM
//!   instance's local control API
//! - **supervisor**: spawn/abort/reap of the VMM child process, console
//!   wiring, and the bounded wait for the control socket
//! - **GuestWorkspace**: the per-guest directory holding the control socket
//!   and log files
//!
//! Lifecycle policy (what to call, in which order, and what state to keep)
//! lives one crate up in `selkie-guest`.

mod client;
mod error;
mod supervisor;
mod workspace;

pub use client::{ApiClient, InstanceState};
pub use error::{VmmError, VmmResult};
pub use supervisor::{
    launch, relax_channel_permissions, wait_for_channel, ChannelBudget, ConsoleMode, VmmProcess,
};
pub use workspace::{
    GuestWorkspace, WORKSPACE_SOCKET_FILENAME, WORKSPACE_STDERR_LOG_FILENAME,
    WORKSPACE_STDOUT_LOG_FILENAME,
};

// ============================================================================
// TigerStyle Constants
// ============================================================================

/// Per-request transport timeout in milliseconds (default)
pub const API_TIMEOUT_MS_DEFAULT: u64 = 5_000;

/// Maximum accepted response body size in bytes
pub const RESPONSE_BYTES_MAX: u64 = 1024 * 1024;

/// First backoff delay while waiting for the control socket, in milliseconds
pub const CHANNEL_WAIT_FIRST_BACKOFF_MS: u64 = 1;

/// Total budget while waiting for the control socket, in milliseconds (default)
pub const CHANNEL_WAIT_BUDGET_MS_DEFAULT: u64 = 10_000;
