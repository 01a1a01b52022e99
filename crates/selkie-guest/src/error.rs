//! Error types for guest lifecycle operations
//!
//! TigerStyle: Explicit error variants with guest context.

use selkie_vmm::VmmError;
use thiserror::Error;

/// Result type for guest operations
pub type GuestResult<T> = Result<T, GuestError>;

/// Errors that can occur while defining or driving a guest
#[derive(Error, Debug)]
pub enum GuestError {
    // ========================================================================
    // Definition Errors
    // ========================================================================
    /// The definition is invalid or inconsistent.
    ///
    /// Primary validation happens in the external parser; the core
    /// re-checks what it relies on and fails closed.
    #[error("invalid guest definition: {reason}")]
    Validation { reason: String },

    /// No disk device's target matches the declared root device name
    #[error("no disk device with target '{root}'")]
    RootDiskMissing { root: String },

    // ========================================================================
    // Precondition Guards
    // ========================================================================
    /// The guest already has a live VMM process
    #[error("guest '{name}' is already running")]
    AlreadyRunning { name: String },

    /// The operation requires a running guest
    #[error("guest '{name}' is not running (state: {state})")]
    NotRunning { name: String, state: String },

    /// The operation requires a paused guest
    #[error("guest '{name}' is not paused (state: {state})")]
    NotPaused { name: String, state: String },

    /// The guest did not boot with a serial console
    #[error("guest '{name}' has no serial console configured")]
    ConsoleUnavailable { name: String },

    // ========================================================================
    // Mechanics
    // ========================================================================
    /// Workspace I/O failed at a point where the operation cannot continue
    #[error("workspace failure for guest '{name}': {reason}")]
    Workspace { name: String, reason: String },

    /// A supervisor or control-plane call failed
    #[error("VMM failure for guest '{name}': {source}")]
    Vmm {
        name: String,
        #[source]
        source: VmmError,
    },
}

impl GuestError {
    /// The underlying VMM error, when this wraps one
    pub fn vmm_cause(&self) -> Option<&VmmError> {
        match self {
            GuestError::Vmm { source, .. } => Some(source),
            _ => None,
        }
    }
}
