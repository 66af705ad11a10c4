use std::{sync::Arc, time::Duration};

use softrouter::{
    config::RouterConfig,
    interfaces::Interface,
    link::tx::ChannelTx,
    mac::Mac,
    network::ipv4::addr::Cidr,
    rip::interface::HorizonPolicy,
    router::{Router, RouterError},
};
use tracing::info;

fn nic(name: &str, mac: [u8; 6], cidr: &str) -> Result<Interface, RouterError> {
    let cidr: Cidr = cidr.parse()?;
    Ok(Interface::new(name, Mac::new(mac), cidr.addr, cidr.mask))
}

/// Two routers wired back to back, exchanging routes over RIP.
#[tokio::main]
async fn main() -> Result<(), RouterError> {
    tracing_subscriber::fmt::init();
    info!("Started process");

    let wire_a = Arc::new(ChannelTx::new());
    let wire_b = Arc::new(ChannelTx::new());
    let a = Router::new(RouterConfig::default(), wire_a.clone()).await;
    let b = Router::new(RouterConfig::default(), wire_b.clone()).await;

    a.add_interface(nic("eth0", [0, 0x69, 0x69, 0, 0, 1], "10.0.0.1/24")?)
        .await?;
    a.add_interface(nic("eth1", [0, 0x69, 0x69, 0, 0, 2], "10.0.1.1/24")?)
        .await?;
    b.add_interface(nic("eth0", [0, 0x69, 0x69, 0, 1, 1], "10.0.1.2/24")?)
        .await?;
    b.add_interface(nic("eth1", [0, 0x69, 0x69, 0, 1, 2], "192.168.5.1/24")?)
        .await?;

    a.bind("eth1", wire_b.bind("eth0").await).await?;
    b.bind("eth0", wire_a.bind("eth1").await).await?;

    a.enable_rip("eth1", HorizonPolicy::default()).await?;
    b.enable_rip("eth0", HorizonPolicy::default()).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mac = a
        .resolve("eth1", "10.0.1.2".parse()?, Duration::from_secs(5))
        .await?;
    info!(%mac, "Neighbor resolved");

    a.print_routes().await.printstd();
    b.print_routes().await.printstd();
    a.print_arp().await.printstd();

    a.shutdown().await;
    b.shutdown().await;
    info!("Stopped process");
    Ok(())
}
