//! Guest definitions and the microVM lifecycle state machine for Selkie
//!
//! TigerStyle: Explicit state machine with the remote as source of truth.
//!
//! # Overview
//!
//! One guest maps to one supervised VMM process and one on-disk workspace.
//! This crate turns an immutable [`GuestDefinition`] into a running (or
//! paused, or shut off) guest by sequencing the mechanics from
//! `selkie-vmm`:
//!
//! - **GuestDefinition**: the structured result of the external document
//!   parser, with the invariants the lifecycle relies on re-checked here
//! - **GuestRuntime** / **Guest**: mutable lifecycle state plus the
//!   activity marker, behind the per-guest exclusive lock
//! - **LifecycleController**: start, shutdown, destroy, suspend, resume,
//!   and status refresh, with best-effort cleanup on the way down
//!
//! # Usage
//!
//! ```ignore
//! use selkie_guest::{DiskDevice, DriverConfig, Guest, GuestDefinition, LifecycleController};
//!
//! let definition = GuestDefinition::builder()
//!     .name("d1")
//!     .memory_mib(128)
//!     .vcpu_count(1)
//!     .kernel_image("/var/lib/selkie/vmlinux")
//!     .kernel_cmdline("panic=1")
//!     .root_device("vda")
//!     .disk(DiskDevice::new("vda", "/var/lib/selkie/rootfs.ext4"))
//!     .serial_port(0)
//!     .build()?;
//!
//! let controller = LifecycleController::new(DriverConfig::default())?;
//! let guest = Guest::new(definition);
//!
//! controller.start(&guest).await?;
//! controller.shutdown(&guest).await?;
//! ```

mod config;
mod controller;
mod definition;
mod error;
mod runtime;

pub use config::{DriverConfig, STATE_ROOT_DEFAULT, VMM_BINARY_PATH_DEFAULT};
pub use controller::{GuestInfo, LifecycleController, ROOT_DRIVE_ID};
pub use definition::{
    DiskBus, DiskDevice, GuestDefinition, GuestDefinitionBuilder, NetworkInterface, SerialConsole,
    GUEST_NAME_LENGTH_MAX,
};
pub use error::{GuestError, GuestResult};
pub use runtime::{Activity, Guest, GuestRuntime, GuestState, StateReason};
