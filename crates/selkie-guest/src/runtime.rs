//! Mutable per-guest runtime state
//!
//! TigerStyle: Explicit state machine, no sentinel values.
//!
//! The lifecycle state field says what the guest *should* be; the activity
//! marker says whether a live VMM process actually backs it. The marker is
//! a tagged variant holding the supervised process handle, so "active" and
//! "owns the process" are the same fact and cannot drift apart. Guards use
//! the marker, not the state field, as the authoritative liveness signal.

use crate::definition::GuestDefinition;
use selkie_vmm::VmmProcess;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};

/// Externally visible lifecycle state of a guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestState {
    /// Unknown or not yet determined; never a valid resting state
    NoState,
    /// The guest is executing
    Running,
    /// The guest is paused and can be resumed
    Paused,
    /// The guest is powered off (restartable into a new session)
    Shutoff,
}

impl std::fmt::Display for GuestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoState => write!(f, "nostate"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Shutoff => write!(f, "shutoff"),
        }
    }
}

/// Why the guest entered its current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateReason {
    /// No recorded cause (initial state, or a refresh from the remote)
    Unknown,
    /// Entered running by booting
    Booted,
    /// Entered running by resuming from pause
    Unpaused,
    /// Paused on user request
    UserPaused,
    /// Shut off by a graceful shutdown
    Shutdown,
    /// Shut off by force-destroy
    Destroyed,
}

/// Whether a live VMM process backs the guest.
///
/// The explicit variant replaces the classic "process id doubles as
/// liveness flag" sentinel: holding the handle and being active are one
/// and the same.
#[derive(Debug, Default)]
pub enum Activity {
    /// No supervised process
    #[default]
    Inactive,
    /// One supervised process, exclusively owned
    Active { process: VmmProcess },
}

/// Mutable runtime object for one guest
#[derive(Debug)]
pub struct GuestRuntime {
    definition: GuestDefinition,
    state: GuestState,
    reason: StateReason,
    activity: Activity,
    persistent: bool,
}

impl GuestRuntime {
    /// Create a runtime for a defined (persistent) guest
    pub fn new(definition: GuestDefinition) -> Self {
        Self {
            definition,
            state: GuestState::NoState,
            reason: StateReason::Unknown,
            activity: Activity::Inactive,
            persistent: true,
        }
    }

    /// Create a runtime for an ephemeral guest that does not survive a
    /// controller restart
    pub fn new_transient(definition: GuestDefinition) -> Self {
        Self {
            persistent: false,
            ..Self::new(definition)
        }
    }

    /// The guest definition
    pub fn definition(&self) -> &GuestDefinition {
        &self.definition
    }

    /// Current lifecycle state
    pub fn state(&self) -> GuestState {
        self.state
    }

    /// Reason for the last state transition
    pub fn reason(&self) -> StateReason {
        self.reason
    }

    /// Whether the guest survives a controller restart
    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// Record a state transition
    pub fn set_state(&mut self, state: GuestState, reason: StateReason) {
        self.state = state;
        self.reason = reason;
    }

    /// Whether a live VMM process backs this guest.
    ///
    /// This, not the state field, is what operation guards consult.
    pub fn is_active(&self) -> bool {
        matches!(self.activity, Activity::Active { .. })
    }

    /// Attach the supervised process after a successful start
    pub fn attach_process(&mut self, process: VmmProcess) {
        self.activity = Activity::Active { process };
    }

    /// Detach and return the supervised process, leaving the guest inactive
    pub fn take_process(&mut self) -> Option<VmmProcess> {
        match std::mem::take(&mut self.activity) {
            Activity::Active { process } => Some(process),
            Activity::Inactive => None,
        }
    }

    /// Console pty path of the active process, if any
    pub fn console_path(&self) -> Option<&Path> {
        match &self.activity {
            Activity::Active { process } => process.console_path(),
            Activity::Inactive => None,
        }
    }
}

/// One guest: its runtime behind the per-guest exclusive lock.
///
/// Lifecycle operations lock the runtime for their whole duration, so two
/// operations on the same guest always serialize while different guests
/// proceed independently.
#[derive(Debug)]
pub struct Guest {
    name: String,
    runtime: Mutex<GuestRuntime>,
}

impl Guest {
    /// Register a persistent guest from its definition
    pub fn new(definition: GuestDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            runtime: Mutex::new(GuestRuntime::new(definition)),
        }
    }

    /// Register an ephemeral guest from its definition
    pub fn new_transient(definition: GuestDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            runtime: Mutex::new(GuestRuntime::new_transient(definition)),
        }
    }

    /// The guest name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the per-guest exclusive lock
    pub async fn lock(&self) -> MutexGuard<'_, GuestRuntime> {
        self.runtime.lock().await
    }
}
