//! Boot Guest Example
//!
//! Boots one microVM guest from a kernel and rootfs image, prints its
//! state, then shuts it down again.
//!
//! Prerequisites:
//! 1. A Firecracker binary (default: /usr/bin/firecracker)
//! 2. A guest kernel image and an ext4 rootfs image
//!
//! Run:
//! ```bash
//! cargo run -p selkie-guest --example boot_guest -- <kernel> <rootfs>
//! ```

use selkie_guest::{
    DiskDevice, DriverConfig, Guest, GuestDefinition, GuestState, LifecycleController,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("selkie_guest=debug".parse()?)
                .add_directive("selkie_vmm=debug".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let kernel = args.next().unwrap_or_else(|| "/var/lib/selkie/vmlinux".to_string());
    let rootfs = args.next().unwrap_or_else(|| "/var/lib/selkie/rootfs.ext4".to_string());

    println!("Boot Guest Example");
    println!("==================");
    println!();
    println!("kernel: {}", kernel);
    println!("rootfs: {}", rootfs);
    println!();

    let definition = GuestDefinition::builder()
        .name("example-guest")
        .memory_mib(128)
        .vcpu_count(1)
        .kernel_image(kernel)
        .kernel_cmdline("console=ttyS0 reboot=k panic=1 pci=off")
        .root_device("vda")
        .disk(DiskDevice::new("vda", rootfs))
        .serial_port(0)
        .build()?;

    let controller = LifecycleController::new(
        DriverConfig::default().with_state_root("/tmp/selkie-example-guests"),
    )?;
    let guest = Guest::new(definition);

    println!("Starting guest...");
    controller.start(&guest).await?;

    let console = controller.console_path(&guest).await?;
    println!("Guest running; serial console at {}", console.display());

    // Give the kernel a moment, then confirm the state with the VMM itself.
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    let state = controller.refresh(&guest).await?;
    println!("Refreshed state: {}", state);
    assert_eq!(state, GuestState::Running);

    println!("Shutting down...");
    controller.shutdown(&guest).await?;
    println!("Guest is {}", controller.info(&guest).await.state);

    Ok(())
}
