//! End-to-end lifecycle tests against a scripted fake VMM
//!
//! Each test gets its own state root, stub VMM binary, and fake
//! control-plane server, so tests are hermetic and run concurrently.

mod support;

use selkie_guest::{
    DiskDevice, DriverConfig, Guest, GuestDefinition, GuestError, GuestState, LifecycleController,
    NetworkInterface, StateReason,
};
use selkie_vmm::VmmError;
use std::path::Path;
use support::{stub_vmm_binary, FakeVmm};

fn test_controller(root: &Path) -> LifecycleController {
    let binary = stub_vmm_binary(root);
    LifecycleController::new(
        DriverConfig::new()
            .with_state_root(root.join("guests"))
            .with_vmm_binary(binary)
            .with_api_timeout_ms(2_000)
            .with_channel_budget_ms(2_000),
    )
    .unwrap()
}

fn serial_definition(name: &str) -> GuestDefinition {
    GuestDefinition::builder()
        .name(name)
        .memory_mib(128)
        .vcpu_count(1)
        .kernel_image("/k")
        .kernel_cmdline("panic=1")
        .root_device("vda")
        .disk(DiskDevice::new("vda", "/img.ext4"))
        .serial_port(0)
        .build()
        .unwrap()
}

fn spawn_fake(controller: &LifecycleController, name: &str) -> support::FakeVmmHandle {
    FakeVmm::new(controller.workspace_for(name).dir()).spawn()
}

#[tokio::test]
async fn test_start_configures_in_order_and_reaches_running() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());
    let guest = Guest::new(serial_definition("d1"));
    let fake = spawn_fake(&controller, "d1");

    controller.start(&guest).await.unwrap();

    {
        let runtime = guest.lock().await;
        assert_eq!(runtime.state(), GuestState::Running);
        assert_eq!(runtime.reason(), StateReason::Booted);
        assert!(runtime.is_active());
    }

    // The serial console is attachable once the guest runs.
    let console = controller.console_path(&guest).await.unwrap();
    assert!(console.starts_with("/dev/"));

    // The boot is observed through a status poll, not assumed.
    assert_eq!(controller.refresh(&guest).await.unwrap(), GuestState::Running);

    let requests = fake.requests().await;
    assert_eq!(requests.len(), 5);

    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].path, "/machine-config");
    assert_eq!(requests[0].body["mem_size_mib"], 128);
    assert_eq!(requests[0].body["vcpu_count"], 1);
    assert_eq!(requests[0].body["ht_enabled"], false);

    assert_eq!(requests[1].path, "/boot-source");
    assert_eq!(requests[1].body["kernel_image_path"], "/k");
    assert_eq!(requests[1].body["boot_args"], "panic=1 console=ttyS0");

    assert_eq!(requests[2].path, "/drives/rootfs");
    assert_eq!(requests[2].body["drive_id"], "rootfs");
    assert_eq!(requests[2].body["path_on_host"], "/img.ext4");
    assert_eq!(requests[2].body["is_root_device"], true);
    assert_eq!(requests[2].body["is_read_only"], false);

    assert_eq!(requests[3].path, "/actions");
    assert_eq!(requests[3].body["action_type"], "InstanceStart");

    assert_eq!(requests[4].method, "GET");
    assert_eq!(requests[4].path, "/");

    controller.destroy(&guest).await.unwrap();
}

#[tokio::test]
async fn test_network_interfaces_register_between_disk_and_start() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());
    let definition = GuestDefinition::builder()
        .name("net1")
        .memory_mib(128)
        .vcpu_count(1)
        .kernel_image("/k")
        .root_device("vda")
        .disk(DiskDevice::new("vda", "/img.ext4"))
        .network_interface(NetworkInterface::new("eth0", "tap0").with_guest_mac("AA:BB:CC:00:11:22"))
        .network_interface(NetworkInterface::new("eth1", "tap1"))
        .build()
        .unwrap();
    let guest = Guest::new(definition);
    let fake = spawn_fake(&controller, "net1");

    controller.start(&guest).await.unwrap();

    let paths: Vec<String> = fake.requests().await.iter().map(|r| r.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            "/machine-config",
            "/boot-source",
            "/drives/rootfs",
            "/network-interfaces/eth0",
            "/network-interfaces/eth1",
            "/actions",
        ]
    );

    let requests = fake.requests().await;
    assert_eq!(requests[3].body["host_dev_name"], "tap0");
    assert_eq!(requests[3].body["guest_mac"], "AA:BB:CC:00:11:22");
    assert_eq!(requests[3].body["allow_mmds_requests"], false);
    assert!(requests[4].body.get("guest_mac").is_none());

    controller.destroy(&guest).await.unwrap();
}

#[tokio::test]
async fn test_start_twice_is_already_running() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());
    let guest = Guest::new(serial_definition("d1"));
    let _fake = spawn_fake(&controller, "d1");

    controller.start(&guest).await.unwrap();

    let result = controller.start(&guest).await;
    match result {
        Err(GuestError::AlreadyRunning { name }) => assert_eq!(name, "d1"),
        other => panic!("expected AlreadyRunning, got {:?}", other),
    }
    assert_eq!(guest.lock().await.state(), GuestState::Running);

    controller.destroy(&guest).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_reaps_process_and_cleans_workspace() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());
    let guest = Guest::new(serial_definition("d1"));
    let _fake = spawn_fake(&controller, "d1");

    controller.start(&guest).await.unwrap();
    controller.shutdown(&guest).await.unwrap();

    {
        let runtime = guest.lock().await;
        assert_eq!(runtime.state(), GuestState::Shutoff);
        assert_eq!(runtime.reason(), StateReason::Shutdown);
        assert!(!runtime.is_active());
    }
    assert!(!controller.workspace_for("d1").dir().exists());

    // Shutting down an already-off guest is a guard failure, not an RPC.
    let result = controller.shutdown(&guest).await;
    assert!(matches!(result, Err(GuestError::NotRunning { .. })));
}

#[tokio::test]
async fn test_restart_after_shutdown() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());
    let guest = Guest::new(serial_definition("d1"));

    let _first = spawn_fake(&controller, "d1");
    controller.start(&guest).await.unwrap();
    controller.shutdown(&guest).await.unwrap();

    // A shut-off guest starts again into a fresh session.
    let _second = spawn_fake(&controller, "d1");
    controller.start(&guest).await.unwrap();
    assert_eq!(guest.lock().await.state(), GuestState::Running);

    controller.destroy(&guest).await.unwrap();
}

#[tokio::test]
async fn test_suspend_resume_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());
    let guest = Guest::new(serial_definition("d1"));
    let _fake = spawn_fake(&controller, "d1");

    controller.start(&guest).await.unwrap();

    controller.suspend(&guest).await.unwrap();
    {
        let runtime = guest.lock().await;
        assert_eq!(runtime.state(), GuestState::Paused);
        assert_eq!(runtime.reason(), StateReason::UserPaused);
    }

    // Suspending a paused guest fails the running check after refresh.
    let result = controller.suspend(&guest).await;
    assert!(matches!(result, Err(GuestError::NotRunning { .. })));

    controller.resume(&guest).await.unwrap();
    {
        let runtime = guest.lock().await;
        assert_eq!(runtime.state(), GuestState::Running);
        assert_eq!(runtime.reason(), StateReason::Unpaused);
    }

    // Resuming a running guest fails the paused check after refresh.
    let result = controller.resume(&guest).await;
    assert!(matches!(result, Err(GuestError::NotPaused { .. })));

    controller.destroy(&guest).await.unwrap();
}

#[tokio::test]
async fn test_destroy_succeeds_with_unreachable_channel() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());
    let guest = Guest::new(serial_definition("d1"));
    let _fake = spawn_fake(&controller, "d1");

    controller.start(&guest).await.unwrap();

    // Simulate a VMM that died out from under us: the control socket is
    // gone, every RPC would fail. Destroy must still work, because its
    // purpose is exactly this case.
    std::fs::remove_file(controller.workspace_for("d1").api_socket()).unwrap();

    controller.destroy(&guest).await.unwrap();

    {
        let runtime = guest.lock().await;
        assert_eq!(runtime.state(), GuestState::Shutoff);
        assert_eq!(runtime.reason(), StateReason::Destroyed);
        assert!(!runtime.is_active());
    }
    assert!(!controller.workspace_for("d1").dir().exists());
}

#[tokio::test]
async fn test_destroy_requires_running_state() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());
    let guest = Guest::new(serial_definition("d1"));
    let _fake = spawn_fake(&controller, "d1");

    controller.start(&guest).await.unwrap();
    controller.suspend(&guest).await.unwrap();

    // destroy is running-only; the refreshless guard sees the cached pause.
    let result = controller.destroy(&guest).await;
    assert!(matches!(result, Err(GuestError::NotRunning { .. })));

    controller.resume(&guest).await.unwrap();
    controller.destroy(&guest).await.unwrap();
}

#[tokio::test]
async fn test_start_failure_after_launch_leaves_no_orphans() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());
    let guest = Guest::new(serial_definition("d1"));
    let _fake = FakeVmm::new(controller.workspace_for("d1").dir())
        .reject("/boot-source", 400)
        .spawn();

    let result = controller.start(&guest).await;
    match result {
        Err(GuestError::Vmm { name, source }) => {
            assert_eq!(name, "d1");
            match source {
                VmmError::ConfigRejected { endpoint, status } => {
                    assert_eq!(endpoint, "/boot-source");
                    assert_eq!(status, 400);
                }
                other => panic!("expected ConfigRejected, got {:?}", other),
            }
        }
        other => panic!("expected Vmm failure, got {:?}", other),
    }

    let runtime = guest.lock().await;
    assert_eq!(runtime.state(), GuestState::NoState);
    assert!(!runtime.is_active());
    assert!(!controller.workspace_for("d1").dir().exists());
}

#[tokio::test]
async fn test_start_channel_timeout_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let binary = stub_vmm_binary(root.path());
    let controller = LifecycleController::new(
        DriverConfig::new()
            .with_state_root(root.path().join("guests"))
            .with_vmm_binary(binary)
            .with_api_timeout_ms(500)
            .with_channel_budget_ms(100),
    )
    .unwrap();
    let guest = Guest::new(serial_definition("d1"));

    // No fake VMM: the control socket never appears.
    let result = controller.start(&guest).await;
    match result {
        Err(ref e) => match e.vmm_cause() {
            Some(VmmError::ChannelTimeout { budget_ms, .. }) => assert_eq!(*budget_ms, 100),
            other => panic!("expected ChannelTimeout, got {:?}", other),
        },
        Ok(()) => panic!("start should not succeed without a control socket"),
    }

    let runtime = guest.lock().await;
    assert_eq!(runtime.state(), GuestState::NoState);
    assert!(!runtime.is_active());
    assert!(!controller.workspace_for("d1").dir().exists());
}

#[tokio::test]
async fn test_concurrent_guests_get_disjoint_workspaces() {
    let root = tempfile::tempdir().unwrap();
    let controller = test_controller(root.path());

    let alpha = Guest::new(serial_definition("alpha"));
    let beta = Guest::new(serial_definition("beta"));
    let _fake_a = spawn_fake(&controller, "alpha");
    let _fake_b = spawn_fake(&controller, "beta");

    let (a, b) = tokio::join!(controller.start(&alpha), controller.start(&beta));
    a.unwrap();
    b.unwrap();

    let ws_a = controller.workspace_for("alpha");
    let ws_b = controller.workspace_for("beta");
    assert_ne!(ws_a.dir(), ws_b.dir());
    assert_ne!(ws_a.api_socket(), ws_b.api_socket());
    assert!(ws_a.dir().exists());
    assert!(ws_b.dir().exists());

    controller.destroy(&alpha).await.unwrap();
    controller.destroy(&beta).await.unwrap();
}
