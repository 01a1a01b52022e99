//! Immutable guest definitions
//!
//! TigerStyle: Builder pattern with fail-closed validation.
//!
//! A `GuestDefinition` is the structured result of the external document
//! parser. That parser owns primary validation; everything here re-checks
//! the invariants the lifecycle code depends on, so a definition that
//! slipped through still fails closed instead of booting a broken guest.
//!
//! The device model is deliberately narrow: the VMM offers one block bus,
//! at most one serial console, and that console is always pty-backed. The
//! unsupported device kinds (console, parallel, channel) are simply not
//! representable here.

use crate::error::{GuestError, GuestResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum guest name length in bytes
pub const GUEST_NAME_LENGTH_MAX: usize = 255;

/// Block device bus kinds the VMM exposes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskBus {
    /// Paravirtual block device
    #[default]
    Virtio,
}

/// One block device of a guest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDevice {
    /// Logical target name referenced by the definition's root device
    pub target: String,
    /// Host path of the backing image
    pub source: String,
    /// Bus kind
    pub bus: DiskBus,
    /// Whether the guest sees the device read-only
    pub read_only: bool,
}

impl DiskDevice {
    /// Create a virtio disk device
    pub fn new(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
            bus: DiskBus::Virtio,
            read_only: false,
        }
    }

    /// Mark the device read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// The guest's serial console.
///
/// Always pty-backed; the VMM supports no other serial transport, so the
/// type has no source field to get wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConsole {
    /// Serial target port (`ttyS<port>` inside the guest)
    pub target_port: u32,
}

impl SerialConsole {
    /// Console on the given serial port
    pub fn new(target_port: u32) -> Self {
        Self { target_port }
    }
}

/// One network interface of a guest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Interface id, also the guest-visible interface name
    pub iface_id: String,
    /// Host tap device to attach
    pub host_dev_name: String,
    /// Fixed guest MAC address, if any
    pub guest_mac: Option<String>,
}

impl NetworkInterface {
    /// Create an interface backed by a host tap device
    pub fn new(iface_id: impl Into<String>, host_dev_name: impl Into<String>) -> Self {
        Self {
            iface_id: iface_id.into(),
            host_dev_name: host_dev_name.into(),
            guest_mac: None,
        }
    }

    /// Set a fixed guest MAC address
    pub fn with_guest_mac(mut self, mac: impl Into<String>) -> Self {
        self.guest_mac = Some(mac.into());
        self
    }
}

/// Immutable description of one guest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDefinition {
    /// Unique guest name (workspace directory name; no newlines)
    pub name: String,
    /// Guest UUID
    pub uuid: Uuid,
    /// Memory size in bytes
    pub memory_bytes: u64,
    /// Fixed vCPU count (no hot-plug)
    pub vcpu_count: u32,
    /// Path to the kernel image
    pub kernel_image_path: String,
    /// Kernel command line (may be empty)
    pub kernel_cmdline: String,
    /// Logical target name of the root disk
    pub root_device: String,
    /// Block devices, in definition order
    pub disks: Vec<DiskDevice>,
    /// At most one pty-backed serial console
    pub serial: Option<SerialConsole>,
    /// Network interfaces, in definition order
    pub network_interfaces: Vec<NetworkInterface>,
}

impl GuestDefinition {
    /// Create a new builder
    pub fn builder() -> GuestDefinitionBuilder {
        GuestDefinitionBuilder::default()
    }

    /// Validate the invariants the lifecycle code relies on
    pub fn validate(&self) -> GuestResult<()> {
        if self.name.is_empty() {
            return Err(GuestError::Validation {
                reason: "guest name cannot be empty".into(),
            });
        }
        if self.name.len() > GUEST_NAME_LENGTH_MAX {
            return Err(GuestError::Validation {
                reason: format!(
                    "guest name length {} exceeds max {}",
                    self.name.len(),
                    GUEST_NAME_LENGTH_MAX
                ),
            });
        }
        if self.name.contains('\n') {
            return Err(GuestError::Validation {
                reason: "guest name cannot contain newline characters".into(),
            });
        }
        if self.memory_bytes == 0 {
            return Err(GuestError::Validation {
                reason: "memory_bytes must be non-zero".into(),
            });
        }
        if self.vcpu_count == 0 {
            return Err(GuestError::Validation {
                reason: "vcpu_count must be at least 1".into(),
            });
        }
        if self.kernel_image_path.trim().is_empty() {
            return Err(GuestError::Validation {
                reason: "kernel_image_path cannot be empty".into(),
            });
        }
        if self.root_device.trim().is_empty() {
            return Err(GuestError::Validation {
                reason: "root_device cannot be empty".into(),
            });
        }

        for disk in &self.disks {
            if disk.target.trim().is_empty() {
                return Err(GuestError::Validation {
                    reason: "disk target cannot be empty".into(),
                });
            }
            if disk.source.trim().is_empty() {
                return Err(GuestError::Validation {
                    reason: format!("disk '{}' has no source path", disk.target),
                });
            }
        }

        for (i, disk) in self.disks.iter().enumerate() {
            if self.disks[..i].iter().any(|d| d.target == disk.target) {
                return Err(GuestError::Validation {
                    reason: format!("duplicate disk target '{}'", disk.target),
                });
            }
        }

        for iface in &self.network_interfaces {
            if iface.iface_id.trim().is_empty() || iface.host_dev_name.trim().is_empty() {
                return Err(GuestError::Validation {
                    reason: "network interface needs both iface_id and host_dev_name".into(),
                });
            }
        }

        // The root lookup is the invariant everything downstream hangs on.
        self.root_disk()?;

        Ok(())
    }

    /// Find the disk whose target matches the declared root device.
    ///
    /// Re-checked at every use, not just at build time: the lookup fails
    /// closed with `RootDiskMissing` even if upstream validation was skipped.
    pub fn root_disk(&self) -> GuestResult<&DiskDevice> {
        self.disks
            .iter()
            .find(|disk| disk.target == self.root_device)
            .ok_or_else(|| GuestError::RootDiskMissing {
                root: self.root_device.clone(),
            })
    }

    /// The kernel command line as actually sent to the VMM.
    ///
    /// With a serial console configured, `console=ttyS<port>` is appended so
    /// the guest kernel talks to the pty; without one the command line goes
    /// out unmodified.
    pub fn boot_args(&self) -> String {
        match &self.serial {
            Some(serial) => {
                if self.kernel_cmdline.is_empty() {
                    format!("console=ttyS{}", serial.target_port)
                } else {
                    format!("{} console=ttyS{}", self.kernel_cmdline, serial.target_port)
                }
            }
            None => self.kernel_cmdline.clone(),
        }
    }
}

/// Builder for [`GuestDefinition`]
#[derive(Debug, Default)]
pub struct GuestDefinitionBuilder {
    name: Option<String>,
    uuid: Option<Uuid>,
    memory_bytes: Option<u64>,
    vcpu_count: Option<u32>,
    kernel_image_path: Option<String>,
    kernel_cmdline: Option<String>,
    root_device: Option<String>,
    disks: Vec<DiskDevice>,
    serial: Option<SerialConsole>,
    network_interfaces: Vec<NetworkInterface>,
}

impl GuestDefinitionBuilder {
    /// Set the guest name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the guest UUID (a random v4 is generated otherwise)
    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Set memory in bytes
    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    /// Set memory in MiB
    pub fn memory_mib(self, mib: u32) -> Self {
        self.memory_bytes(mib as u64 * 1024 * 1024)
    }

    /// Set the vCPU count
    pub fn vcpu_count(mut self, count: u32) -> Self {
        self.vcpu_count = Some(count);
        self
    }

    /// Set the kernel image path
    pub fn kernel_image(mut self, path: impl Into<String>) -> Self {
        self.kernel_image_path = Some(path.into());
        self
    }

    /// Set the kernel command line
    pub fn kernel_cmdline(mut self, cmdline: impl Into<String>) -> Self {
        self.kernel_cmdline = Some(cmdline.into());
        self
    }

    /// Set the root device logical name
    pub fn root_device(mut self, target: impl Into<String>) -> Self {
        self.root_device = Some(target.into());
        self
    }

    /// Add a disk device
    pub fn disk(mut self, disk: DiskDevice) -> Self {
        self.disks.push(disk);
        self
    }

    /// Configure a serial console on the given port
    pub fn serial_port(mut self, target_port: u32) -> Self {
        self.serial = Some(SerialConsole::new(target_port));
        self
    }

    /// Add a network interface
    pub fn network_interface(mut self, iface: NetworkInterface) -> Self {
        self.network_interfaces.push(iface);
        self
    }

    /// Build the definition, validating all invariants
    pub fn build(self) -> GuestResult<GuestDefinition> {
        let definition = GuestDefinition {
            name: self.name.unwrap_or_default(),
            uuid: self.uuid.unwrap_or_else(Uuid::new_v4),
            memory_bytes: self.memory_bytes.unwrap_or(0),
            vcpu_count: self.vcpu_count.unwrap_or(0),
            kernel_image_path: self.kernel_image_path.unwrap_or_default(),
            kernel_cmdline: self.kernel_cmdline.unwrap_or_default(),
            root_device: self.root_device.unwrap_or_default(),
            disks: self.disks,
            serial: self.serial,
            network_interfaces: self.network_interfaces,
        };

        definition.validate()?;
        Ok(definition)
    }
}
