//! The guest lifecycle state machine
//!
//! TigerStyle: One operation at a time per guest, status never assumed.
//!
//! The controller sequences workspace, supervisor, and control-plane calls
//! into the externally visible lifecycle operations. Every operation locks
//! the guest runtime for its full duration, so internal multi-step
//! sequences are atomic from the caller's point of view.
//!
//! Apart from destroy, every transition re-queries the remote before
//! acting: the VMM process can die or change state outside this
//! controller's control. Destroy is the deliberate exception, since its
//! whole purpose is to force cleanup when the remote is unreachable.

use crate::config::DriverConfig;
use crate::definition::{DiskDevice, GuestDefinition};
use crate::error::{GuestError, GuestResult};
use crate::runtime::{Guest, GuestRuntime, GuestState, StateReason};
use selkie_vmm::{
    launch, relax_channel_permissions, wait_for_channel, ApiClient, ChannelBudget, ConsoleMode,
    GuestWorkspace, InstanceState, VmmError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Drive id under which the root disk is registered with the VMM
pub const ROOT_DRIVE_ID: &str = "rootfs";

/// Snapshot of a guest for callers that only want to look
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub state: GuestState,
    pub reason: StateReason,
    pub memory_bytes: u64,
    pub vcpu_count: u32,
    pub persistent: bool,
}

fn remote_to_state(remote: InstanceState) -> GuestState {
    match remote {
        InstanceState::Running => GuestState::Running,
        InstanceState::Paused => GuestState::Paused,
        InstanceState::NotStarted => GuestState::Shutoff,
    }
}

/// Drives the lifecycle of guests against one driver configuration.
///
/// An explicitly constructed instance: callers hold it and pass guests in,
/// there is no ambient driver singleton. The controller itself is stateless
/// across calls (the client is stateless, the config read-only), so one
/// instance serves any number of guests concurrently.
#[derive(Debug)]
pub struct LifecycleController {
    config: DriverConfig,
    client: ApiClient,
    channel_budget: ChannelBudget,
}

impl LifecycleController {
    /// Create a controller from a validated driver configuration
    pub fn new(config: DriverConfig) -> GuestResult<Self> {
        config.validate()?;

        let client = ApiClient::new().with_timeout(Duration::from_millis(config.api_timeout_ms));
        let channel_budget = ChannelBudget::new().with_budget_ms(config.channel_budget_ms);

        Ok(Self {
            config,
            client,
            channel_budget,
        })
    }

    /// The driver configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The workspace a guest name maps to under this configuration
    pub fn workspace_for(&self, guest_name: &str) -> GuestWorkspace {
        GuestWorkspace::new(&self.config.state_root, guest_name)
    }

    /// Start a guest: clean workspace, supervised VMM process, full
    /// pre-boot configuration, boot action.
    ///
    /// On any failure after the process was launched, the process is
    /// aborted and the workspace deleted before the error is returned: a
    /// failed start never leaves an orphan. The guest state is unchanged by
    /// failure.
    pub async fn start(&self, guest: &Guest) -> GuestResult<()> {
        let mut runtime = guest.lock().await;
        let name = guest.name();

        if runtime.is_active() {
            return Err(GuestError::AlreadyRunning {
                name: name.to_string(),
            });
        }

        let definition = runtime.definition().clone();
        // Fail closed before any side effect, even though the definition
        // was validated at build time.
        let root = definition.root_disk()?.clone();

        let workspace = self.workspace_for(name);
        workspace
            .recreate()
            .await
            .map_err(|e| GuestError::Workspace {
                name: name.to_string(),
                reason: format!("cannot recreate {}: {}", workspace.dir().display(), e),
            })?;

        let console = match definition.serial {
            Some(_) => ConsoleMode::Pty,
            None => ConsoleMode::LogFile,
        };

        let mut process = match launch(&self.config.vmm_binary, &workspace, console).await {
            Ok(process) => process,
            Err(e) => {
                workspace.remove().await;
                return Err(self.vmm_failure(name, e));
            }
        };

        if let Err(e) = self.configure_and_boot(&definition, &root, &workspace).await {
            process.abort().await;
            workspace.remove().await;
            return Err(e);
        }

        runtime.attach_process(process);
        runtime.set_state(GuestState::Running, StateReason::Booted);

        info!(guest = %name, "guest started");
        Ok(())
    }

    /// Gracefully shut the guest down and reap the VMM process.
    ///
    /// The status refresh preceding the shutdown action tolerates failure
    /// only when the last cached state was already shutoff; a refresh
    /// failure from any other cached state aborts the operation.
    pub async fn shutdown(&self, guest: &Guest) -> GuestResult<()> {
        let mut runtime = guest.lock().await;
        let name = guest.name();

        if !runtime.is_active() {
            return Err(GuestError::NotRunning {
                name: name.to_string(),
                state: runtime.state().to_string(),
            });
        }

        let workspace = self.workspace_for(name);
        let socket = workspace.api_socket();

        let cached = runtime.state();
        if let Err(e) = self.refresh_locked(name, &mut runtime).await {
            // An unreachable VMM is expected when the guest was already off;
            // from any other cached state the operation cannot proceed
            // safely on stale knowledge.
            if cached != GuestState::Shutoff {
                return Err(e);
            }
        }

        if runtime.state() != GuestState::Running {
            return Err(GuestError::NotRunning {
                name: name.to_string(),
                state: runtime.state().to_string(),
            });
        }

        self.client
            .request_shutdown(&socket)
            .await
            .map_err(|e| self.vmm_failure(name, e))?;

        runtime.set_state(GuestState::Shutoff, StateReason::Shutdown);

        if let Some(mut process) = runtime.take_process() {
            let status = process.reap().await.map_err(|e| self.vmm_failure(name, e))?;
            debug!(guest = %name, %status, "VMM process reaped");
        }

        workspace.remove_socket().await;
        workspace.remove().await;

        info!(guest = %name, "guest shut down");
        Ok(())
    }

    /// Force-destroy the guest: kill the VMM process immediately, no grace.
    ///
    /// Works without touching the remote, so it succeeds even when the
    /// control channel is gone. Requires a running guest.
    pub async fn destroy(&self, guest: &Guest) -> GuestResult<()> {
        let mut runtime = guest.lock().await;
        let name = guest.name();

        if !runtime.is_active() || runtime.state() != GuestState::Running {
            return Err(GuestError::NotRunning {
                name: name.to_string(),
                state: runtime.state().to_string(),
            });
        }

        if let Some(mut process) = runtime.take_process() {
            process.abort().await;
        }

        let workspace = self.workspace_for(name);
        workspace.remove_socket().await;
        workspace.remove().await;

        runtime.set_state(GuestState::Shutoff, StateReason::Destroyed);

        info!(guest = %name, "guest destroyed");
        Ok(())
    }

    /// Pause a running guest
    pub async fn suspend(&self, guest: &Guest) -> GuestResult<()> {
        let mut runtime = guest.lock().await;
        let name = guest.name();

        if !runtime.is_active() {
            return Err(GuestError::NotRunning {
                name: name.to_string(),
                state: runtime.state().to_string(),
            });
        }

        self.refresh_locked(name, &mut runtime).await?;

        if runtime.state() != GuestState::Running {
            return Err(GuestError::NotRunning {
                name: name.to_string(),
                state: runtime.state().to_string(),
            });
        }

        let socket = self.workspace_for(name).api_socket();
        self.client
            .set_run_state(&socket, "Paused")
            .await
            .map_err(|e| self.vmm_failure(name, e))?;

        runtime.set_state(GuestState::Paused, StateReason::UserPaused);

        info!(guest = %name, "guest suspended");
        Ok(())
    }

    /// Resume a paused guest
    pub async fn resume(&self, guest: &Guest) -> GuestResult<()> {
        let mut runtime = guest.lock().await;
        let name = guest.name();

        if !runtime.is_active() {
            return Err(GuestError::NotPaused {
                name: name.to_string(),
                state: runtime.state().to_string(),
            });
        }

        self.refresh_locked(name, &mut runtime).await?;

        if runtime.state() != GuestState::Paused {
            return Err(GuestError::NotPaused {
                name: name.to_string(),
                state: runtime.state().to_string(),
            });
        }

        let socket = self.workspace_for(name).api_socket();
        self.client
            .set_run_state(&socket, "Resumed")
            .await
            .map_err(|e| self.vmm_failure(name, e))?;

        runtime.set_state(GuestState::Running, StateReason::Unpaused);

        info!(guest = %name, "guest resumed");
        Ok(())
    }

    /// Re-query the remote and store the mapped state.
    ///
    /// On failure the guest settles at `NoState` ("unknown") and the error
    /// is reported; deciding to treat an unreachable remote as shutoff is
    /// the caller's call (or use [`LifecycleController::sync_state`]).
    pub async fn refresh(&self, guest: &Guest) -> GuestResult<GuestState> {
        let mut runtime = guest.lock().await;
        self.refresh_locked(guest.name(), &mut runtime).await
    }

    /// Refresh, treating an unreachable or garbled remote as shutoff.
    ///
    /// The convenience wrapper callers reporting state to users want: a
    /// guest whose VMM process died simply reads as shut off.
    pub async fn sync_state(&self, guest: &Guest) -> GuestState {
        let mut runtime = guest.lock().await;

        if let Err(e) = self.refresh_locked(guest.name(), &mut runtime).await {
            debug!(guest = %guest.name(), error = %e, "refresh failed; reporting guest as shut off");
            runtime.set_state(GuestState::Shutoff, StateReason::Unknown);
        }

        runtime.state()
    }

    /// Console pty path for attaching to the guest's serial console
    pub async fn console_path(&self, guest: &Guest) -> GuestResult<PathBuf> {
        let runtime = guest.lock().await;
        let name = guest.name();

        if !runtime.is_active() {
            return Err(GuestError::NotRunning {
                name: name.to_string(),
                state: runtime.state().to_string(),
            });
        }

        runtime
            .console_path()
            .map(|path| path.to_path_buf())
            .ok_or_else(|| GuestError::ConsoleUnavailable {
                name: name.to_string(),
            })
    }

    /// Current snapshot of the guest for informational callers
    pub async fn info(&self, guest: &Guest) -> GuestInfo {
        let runtime = guest.lock().await;
        GuestInfo {
            state: runtime.state(),
            reason: runtime.reason(),
            memory_bytes: runtime.definition().memory_bytes,
            vcpu_count: runtime.definition().vcpu_count,
            persistent: runtime.persistent(),
        }
    }

    async fn refresh_locked(
        &self,
        name: &str,
        runtime: &mut GuestRuntime,
    ) -> GuestResult<GuestState> {
        let socket = self.workspace_for(name).api_socket();

        match self.client.instance_state(&socket).await {
            Ok(remote) => {
                let state = remote_to_state(remote);
                runtime.set_state(state, StateReason::Unknown);
                debug!(guest = %name, %state, "guest state refreshed");
                Ok(state)
            }
            Err(e) => {
                runtime.set_state(GuestState::NoState, StateReason::Unknown);
                Err(self.vmm_failure(name, e))
            }
        }
    }

    /// The fixed pre-boot configuration order: machine → boot source →
    /// disk(s) → network interfaces → start action. The VMM rejects
    /// anything else, so no call here may be reordered.
    async fn configure_and_boot(
        &self,
        definition: &GuestDefinition,
        root: &DiskDevice,
        workspace: &GuestWorkspace,
    ) -> GuestResult<()> {
        let socket = workspace.api_socket();
        let name = &definition.name;
        let vmm = |e: VmmError| GuestError::Vmm {
            name: name.clone(),
            source: e,
        };

        wait_for_channel(&socket, &self.channel_budget)
            .await
            .map_err(vmm)?;
        relax_channel_permissions(&socket).await;

        self.client
            .configure_machine(
                &socket,
                definition.memory_bytes,
                definition.vcpu_count,
                self.config.ht_enabled,
            )
            .await
            .map_err(vmm)?;

        self.client
            .configure_boot(&socket, &definition.kernel_image_path, &definition.boot_args())
            .await
            .map_err(vmm)?;

        self.client
            .configure_disk(&socket, ROOT_DRIVE_ID, &root.source, true, false)
            .await
            .map_err(vmm)?;

        for iface in &definition.network_interfaces {
            self.client
                .configure_network(
                    &socket,
                    &iface.iface_id,
                    iface.guest_mac.as_deref(),
                    &iface.host_dev_name,
                    false,
                )
                .await
                .map_err(vmm)?;
        }

        self.client.start_instance(&socket).await.map_err(vmm)?;

        Ok(())
    }

    fn vmm_failure(&self, name: &str, source: VmmError) -> GuestError {
        GuestError::Vmm {
            name: name.to_string(),
            source,
        }
    }
}
