//! Error types for VMM supervision and control-plane calls
//!
//! TigerStyle: Explicit error variants with context for debugging.

use thiserror::Error;

/// Result type for VMM operations
pub type VmmResult<T> = Result<T, VmmError>;

/// Errors that can occur while supervising a VMM process or driving its
/// control-plane API
#[derive(Error, Debug)]
pub enum VmmError {
    // ========================================================================
    // Process Errors
    // ========================================================================
    /// Spawning the VMM binary failed
    #[error("failed to spawn VMM process '{binary}': {reason}")]
    SpawnFailed { binary: String, reason: String },

    /// Waiting for the VMM process to exit failed
    #[error("failed waiting for VMM process to be reaped: {reason}")]
    WaitFailed { reason: String },

    /// The control socket never appeared within the wait budget
    #[error("control channel '{path}' not ready after {budget_ms}ms")]
    ChannelTimeout { path: String, budget_ms: u64 },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// The control channel could not be reached or the connection failed
    #[error("transport error on control channel '{path}': {reason}")]
    Transport { path: String, reason: String },

    /// The remote answered with something that is not valid HTTP/JSON
    #[error("malformed response from VMM control channel: {reason}")]
    Protocol { reason: String },

    // ========================================================================
    // Remote Rejections
    // ========================================================================
    /// A configuration endpoint returned a non-success status
    #[error("VMM rejected configuration '{endpoint}' with status {status}")]
    ConfigRejected { endpoint: String, status: u16 },

    /// The instance-start action returned a non-success status
    #[error("VMM rejected instance start with status {status}")]
    StartRejected { status: u16 },

    /// The shutdown action returned a non-success status
    #[error("VMM rejected shutdown action with status {status}")]
    ShutdownRejected { status: u16 },

    /// A pause/resume request returned a non-success status
    #[error("VMM rejected run-state change to '{target}' with status {status}")]
    StateChangeRejected { target: String, status: u16 },

    // ========================================================================
    // Local Guards
    // ========================================================================
    /// Run-state target was not exactly "Paused" or "Resumed"
    #[error("invalid run-state target '{requested}': must be exactly 'Paused' or 'Resumed'")]
    InvalidStateRequest { requested: String },
}

impl VmmError {
    /// Check if this error means the remote end could not be reached at all,
    /// as opposed to the remote rejecting or garbling a request
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            VmmError::Transport { .. } | VmmError::ChannelTimeout { .. }
        )
    }
}
