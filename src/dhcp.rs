use std::{collections::HashMap, sync::Arc};

use derivative::Derivative;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    interfaces::InterfaceRegistry,
    link::tx::FrameTx,
    mac::Mac,
    network::ipv4::addr::IpV4Addr,
};

use self::{
    conflict::DhcpIpConflictDetector,
    packet::DhcpReply,
    server::{DhcpServer, DhcpServerConfig, LeaseInfo},
};

pub mod conflict;
pub mod packet;
pub mod server;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DhcpError {
    #[error("DHCP is not enabled on {0}")]
    NotEnabled(String),
    #[error("unknown interface {0}")]
    UnknownInterface(String),
    #[error("{0} is outside the interface subnet")]
    OutOfSubnet(IpV4Addr),
    #[error("pool start is above pool end")]
    InvalidPool,
}

/// The DHCP servers of every interface it is enabled on.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DhcpEngine {
    #[derivative(Debug = "ignore")]
    interfaces: Arc<InterfaceRegistry>,
    #[derivative(Debug = "ignore")]
    detector: Arc<DhcpIpConflictDetector>,
    #[derivative(Debug = "ignore")]
    tx: Arc<dyn FrameTx>,
    servers: RwLock<HashMap<String, Arc<DhcpServer>>>,
}

impl DhcpEngine {
    pub fn new(
        interfaces: Arc<InterfaceRegistry>,
        detector: Arc<DhcpIpConflictDetector>,
        tx: Arc<dyn FrameTx>,
    ) -> Self {
        Self {
            interfaces,
            detector,
            tx,
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Starts (or restarts with fresh tables) the server on `iface`.
    pub async fn enable(&self, iface: &str, config: DhcpServerConfig) -> Result<(), DhcpError> {
        let nic = self
            .interfaces
            .get(iface)
            .await
            .ok_or_else(|| DhcpError::UnknownInterface(iface.to_string()))?;
        if config.pool_start > config.pool_end {
            return Err(DhcpError::InvalidPool);
        }
        for addr in [config.pool_start, config.pool_end] {
            if !nic.contains(addr) {
                return Err(DhcpError::OutOfSubnet(addr));
            }
        }

        info!(NIC = iface, mode = %config.mode, start = %config.pool_start, end = %config.pool_end, "DHCP enabled");
        let server = DhcpServer::new(
            iface,
            config,
            self.detector.clone(),
            self.interfaces.clone(),
            self.tx.clone(),
        );
        self.servers
            .write()
            .await
            .insert(iface.to_string(), Arc::new(server));
        Ok(())
    }

    pub async fn disable(&self, iface: &str) -> Result<(), DhcpError> {
        self.servers
            .write()
            .await
            .remove(iface)
            .map(|_| info!(NIC = iface, "DHCP disabled"))
            .ok_or_else(|| DhcpError::NotEnabled(iface.to_string()))
    }

    pub async fn is_enabled(&self, iface: &str) -> bool {
        self.servers.read().await.contains_key(iface)
    }

    async fn server(&self, iface: &str) -> Result<Arc<DhcpServer>, DhcpError> {
        self.servers
            .read()
            .await
            .get(iface)
            .cloned()
            .ok_or_else(|| DhcpError::NotEnabled(iface.to_string()))
    }

    /// Client payload received on `iface`. Dropped when DHCP is off there.
    pub async fn on_dhcp_packet(&self, iface: &str, src_mac: Mac, payload: &[u8]) -> Option<DhcpReply> {
        match self.server(iface).await {
            Ok(server) => server.handle(src_mac, payload).await,
            Err(_) => {
                debug!(NIC = iface, "DHCP packet on an interface without DHCP");
                None
            }
        }
    }

    pub async fn add_manual_binding(&self, iface: &str, mac: Mac, ip: IpV4Addr) -> Result<(), DhcpError> {
        let server = self.server(iface).await?;
        let nic = self
            .interfaces
            .get(iface)
            .await
            .ok_or_else(|| DhcpError::UnknownInterface(iface.to_string()))?;
        if !nic.contains(ip) {
            return Err(DhcpError::OutOfSubnet(ip));
        }
        server.add_manual(mac, ip).await;
        info!(NIC = iface, %mac, %ip, "Manual binding added");
        Ok(())
    }

    /// Returns the address the binding held, if there was one.
    pub async fn remove_manual_binding(&self, iface: &str, mac: Mac) -> Result<Option<IpV4Addr>, DhcpError> {
        Ok(self.server(iface).await?.remove_manual(mac).await)
    }

    pub async fn manual_bindings(&self, iface: &str) -> Result<Vec<(Mac, IpV4Addr)>, DhcpError> {
        Ok(self.server(iface).await?.manual_bindings().await)
    }

    pub async fn leases(&self, iface: &str) -> Result<Vec<LeaseInfo>, DhcpError> {
        Ok(self.server(iface).await?.leases().await)
    }

    /// Leases of every enabled interface, grouped by interface name.
    pub async fn all_leases(&self) -> Vec<LeaseInfo> {
        let mut servers: Vec<_> = self
            .servers
            .read()
            .await
            .iter()
            .map(|(name, s)| (name.clone(), s.clone()))
            .collect();
        servers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut all = Vec::new();
        for (_, server) in servers {
            all.extend(server.leases().await);
        }
        all
    }

    pub async fn print_leases(&self) -> prettytable::Table {
        let mut table = prettytable::table!(["interface", "address", "mac", "mode", "remaining (s)"]);
        for lease in self.all_leases().await {
            table.add_row(prettytable::row![
                lease.iface,
                lease.ip,
                lease.mac,
                lease.mode,
                lease.remaining.map(|d| d.as_secs().to_string()).unwrap_or_default()
            ]);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ArpTimers,
        dhcp::{packet::tests::client_message, server::DhcpMode},
        interfaces::Interface,
        link::tx::ChannelTx,
        network::{
            arp::{proxy::ProxyArpConfigInner, ArpEngine},
            ipv4::addr::IpV4Mask,
        },
        route::rib::Rib,
    };

    const CLIENT: Mac = Mac::new([2, 0, 0, 0, 0, 0xc1]);

    fn ip(s: &str) -> IpV4Addr {
        s.parse().unwrap()
    }

    fn config(mode: DhcpMode) -> DhcpServerConfig {
        DhcpServerConfig::new(
            ip("10.0.0.10"),
            ip("10.0.0.20"),
            IpV4Mask::new(24).unwrap(),
            ip("10.0.0.1"),
            mode,
        )
    }

    async fn engine() -> DhcpEngine {
        let interfaces = Arc::new(InterfaceRegistry::new());
        for (name, last, net) in [("eth0", 1, 0), ("eth1", 2, 1)] {
            interfaces
                .add(Interface::new(
                    name,
                    Mac::new([2, 0, 0, 0, 0, last]),
                    IpV4Addr::new([10, 0, net, 1]),
                    IpV4Mask::new(24).unwrap(),
                ))
                .await
                .unwrap();
        }
        let tx = Arc::new(ChannelTx::new());
        let arp = Arc::new(ArpEngine::new(
            interfaces.clone(),
            Arc::new(Rib::new()),
            tx.clone(),
            ArpTimers::default(),
            Arc::new(RwLock::new(ProxyArpConfigInner::default())),
        ));
        DhcpEngine::new(interfaces, Arc::new(DhcpIpConflictDetector::new(arp)), tx)
    }

    #[tokio::test]
    async fn disabled_interface_reports_not_enabled() {
        let e = engine().await;
        assert_eq!(
            e.leases("eth0").await,
            Err(DhcpError::NotEnabled("eth0".to_string()))
        );
        assert_eq!(
            e.add_manual_binding("eth0", CLIENT, ip("10.0.0.50")).await,
            Err(DhcpError::NotEnabled("eth0".to_string()))
        );
        assert_eq!(e.disable("eth0").await, Err(DhcpError::NotEnabled("eth0".to_string())));
        assert!(e
            .on_dhcp_packet("eth0", CLIENT, &client_message(1, 1, CLIENT, None))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn enable_validates_input() {
        let e = engine().await;
        assert_eq!(
            e.enable("eth9", config(DhcpMode::Dynamic)).await,
            Err(DhcpError::UnknownInterface("eth9".to_string()))
        );
        // eth1 is 10.0.1.0/24, the pool is not.
        assert_eq!(
            e.enable("eth1", config(DhcpMode::Dynamic)).await,
            Err(DhcpError::OutOfSubnet(ip("10.0.0.10")))
        );
        let mut backwards = config(DhcpMode::Dynamic);
        backwards.pool_start = ip("10.0.0.30");
        assert_eq!(e.enable("eth0", backwards).await, Err(DhcpError::InvalidPool));

        e.enable("eth0", config(DhcpMode::Dynamic)).await.unwrap();
        assert!(e.is_enabled("eth0").await);
        assert!(!e.is_enabled("eth1").await);
    }

    #[tokio::test]
    async fn manual_binding_operations() {
        let e = engine().await;
        e.enable("eth0", config(DhcpMode::Manual)).await.unwrap();
        assert_eq!(
            e.add_manual_binding("eth0", CLIENT, ip("10.0.1.5")).await,
            Err(DhcpError::OutOfSubnet(ip("10.0.1.5")))
        );
        e.add_manual_binding("eth0", CLIENT, ip("10.0.0.50")).await.unwrap();
        assert_eq!(
            e.manual_bindings("eth0").await.unwrap(),
            vec![(CLIENT, ip("10.0.0.50"))]
        );

        let offer = e
            .on_dhcp_packet("eth0", CLIENT, &client_message(1, 9, CLIENT, None))
            .await
            .unwrap();
        assert_eq!(offer.yiaddr, ip("10.0.0.50"));
        assert_eq!(offer.xid, 9);

        let leases = e.all_leases().await;
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].iface, "eth0");
        assert_eq!(e.print_leases().await.len(), 2);

        assert_eq!(
            e.remove_manual_binding("eth0", CLIENT).await,
            Ok(Some(ip("10.0.0.50")))
        );
        assert_eq!(e.remove_manual_binding("eth0", CLIENT).await, Ok(None));
    }

    #[tokio::test]
    async fn re_enable_resets_tables() {
        let e = engine().await;
        e.enable("eth0", config(DhcpMode::Manual)).await.unwrap();
        e.add_manual_binding("eth0", CLIENT, ip("10.0.0.50")).await.unwrap();
        e.disable("eth0").await.unwrap();
        e.enable("eth0", config(DhcpMode::Manual)).await.unwrap();
        assert!(e.manual_bindings("eth0").await.unwrap().is_empty());
    }
}
