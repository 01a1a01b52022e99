//! Driver-wide configuration
//!
//! TigerStyle: Explicit defaults with units in names.

use crate::error::{GuestError, GuestResult};
use selkie_vmm::{API_TIMEOUT_MS_DEFAULT, CHANNEL_WAIT_BUDGET_MS_DEFAULT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default state root under which guest workspaces are created
pub const STATE_ROOT_DEFAULT: &str = "/var/run/selkie/guests";

/// Default path to the VMM binary
pub const VMM_BINARY_PATH_DEFAULT: &str = "/usr/bin/firecracker";

/// Driver-wide settings shared by every guest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Root directory for per-guest workspaces
    pub state_root: PathBuf,
    /// Path to the VMM binary to supervise
    pub vmm_binary: PathBuf,
    /// Whether to request hyperthreading in the machine config
    pub ht_enabled: bool,
    /// Per-request control-plane transport timeout in milliseconds
    pub api_timeout_ms: u64,
    /// Total budget for the control socket to appear, in milliseconds
    pub channel_budget_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            state_root: PathBuf::from(STATE_ROOT_DEFAULT),
            vmm_binary: PathBuf::from(VMM_BINARY_PATH_DEFAULT),
            ht_enabled: false,
            api_timeout_ms: API_TIMEOUT_MS_DEFAULT,
            channel_budget_ms: CHANNEL_WAIT_BUDGET_MS_DEFAULT,
        }
    }
}

impl DriverConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state root
    pub fn with_state_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.state_root = root.into();
        self
    }

    /// Set the VMM binary path
    pub fn with_vmm_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.vmm_binary = binary.into();
        self
    }

    /// Enable or disable hyperthreading in the machine config
    pub fn with_ht_enabled(mut self, enabled: bool) -> Self {
        self.ht_enabled = enabled;
        self
    }

    /// Set the control-plane transport timeout
    pub fn with_api_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.api_timeout_ms = timeout_ms;
        self
    }

    /// Set the control-socket wait budget
    pub fn with_channel_budget_ms(mut self, budget_ms: u64) -> Self {
        self.channel_budget_ms = budget_ms;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> GuestResult<()> {
        if self.state_root.as_os_str().is_empty() {
            return Err(GuestError::Validation {
                reason: "state_root cannot be empty".into(),
            });
        }
        if self.vmm_binary.as_os_str().is_empty() {
            return Err(GuestError::Validation {
                reason: "vmm_binary cannot be empty".into(),
            });
        }
        if self.api_timeout_ms == 0 {
            return Err(GuestError::Validation {
                reason: "api_timeout_ms must be non-zero: control-plane calls may never block unbounded".into(),
            });
        }
        if self.channel_budget_ms == 0 {
            return Err(GuestError::Validation {
                reason: "channel_budget_ms must be non-zero".into(),
            });
        }
        Ok(())
    }
}
