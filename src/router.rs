use std::{collections::HashMap, sync::Arc, time::Duration};

use derivative::Derivative;
use flume::Receiver;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::{
    config::RouterConfig,
    dhcp::{
        conflict::DhcpIpConflictDetector,
        packet::SERVER_PORT,
        server::{DhcpServerConfig, LeaseInfo},
        DhcpEngine, DhcpError,
    },
    forward::{Forwarder, Verdict},
    interfaces::{Interface, InterfaceError, InterfaceRegistry},
    link::{
        ethernet::{ethertype::EtherType, packet::EthernetPacket},
        tx::FrameTx,
    },
    mac::Mac,
    network::{
        arp::{
            cache::ArpEntry, proxy::ProxyArpConfigInner, scheduler::ResolveError, ArpEngine,
        },
        ipv4::{
            addr::{self, AddrParseError, Cidr, IpV4Addr},
            packet::Ipv4Packet,
            protocol::ProtocolType,
        },
    },
    process::{Pid, ProcessManager, StopOutcome},
    rip::{interface::HorizonPolicy, packet::RIP_PORT, RipEngine, RipError},
    route::{rib::Rib, RouteEntry, RouteError},
    transport::udp::packet::UdpPacket,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error(transparent)]
    Addr(#[from] AddrParseError),
    #[error(transparent)]
    Interface(#[from] InterfaceError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Dhcp(#[from] DhcpError),
    #[error(transparent)]
    Rip(#[from] RipError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{0} already has a receive queue")]
    AlreadyBound(String),
}

/// What the demultiplexer did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Arp,
    Rip,
    Dhcp,
    Forward(Verdict),
    /// Unicast to somebody else's MAC, or an ether type we do not speak.
    Ignored,
}

/// One router: every protocol engine wired to a shared interface registry,
/// RIB and transmit path.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Router {
    config: RouterConfig,
    #[derivative(Debug = "ignore")]
    interfaces: Arc<InterfaceRegistry>,
    #[derivative(Debug = "ignore")]
    rib: Arc<Rib>,
    arp: Arc<ArpEngine>,
    dhcp: Arc<DhcpEngine>,
    rip: Arc<RipEngine>,
    #[derivative(Debug = "ignore")]
    forwarder: Forwarder,
    processes: ProcessManager,
    receivers: Mutex<HashMap<String, Pid>>,
}

impl Router {
    /// Builds every component and starts the background tasks.
    pub async fn new(config: RouterConfig, tx: Arc<dyn FrameTx>) -> Arc<Self> {
        let interfaces = Arc::new(InterfaceRegistry::new());
        let rib = Arc::new(Rib::new());
        let processes = ProcessManager::new();
        let proxy = Arc::new(RwLock::new(ProxyArpConfigInner {
            enabled: config.proxy_arp,
            ..Default::default()
        }));
        let arp = Arc::new(ArpEngine::new(
            interfaces.clone(),
            rib.clone(),
            tx.clone(),
            config.arp.clone(),
            proxy,
        ));
        let detector = Arc::new(DhcpIpConflictDetector::new(arp.clone()));
        let rip = Arc::new(RipEngine::new(
            rib.clone(),
            interfaces.clone(),
            tx.clone(),
            config.rip.clone(),
            processes.clone(),
        ));

        let cache = arp.cache().clone();
        processes
            .add("arp aging", move |_, mut stop| async move {
                tokio::select! {
                    _ = stop.stopped() => {}
                    _ = cache.aging_loop() => {}
                }
            })
            .await;
        let seen = arp.subscribe().await;
        let listener = detector.clone();
        processes
            .add("dhcp conflict listener", move |_, mut stop| async move {
                tokio::select! {
                    _ = stop.stopped() => {}
                    _ = listener.listen(seen) => {}
                }
            })
            .await;
        rip.start().await;

        Arc::new(Self {
            dhcp: Arc::new(DhcpEngine::new(interfaces.clone(), detector, tx.clone())),
            forwarder: Forwarder::new(interfaces.clone(), rib.clone(), arp.clone(), tx),
            config,
            interfaces,
            rib,
            arp,
            rip,
            processes,
            receivers: Mutex::new(HashMap::new()),
        })
    }

    pub fn rib(&self) -> &Arc<Rib> {
        &self.rib
    }

    pub fn arp(&self) -> &Arc<ArpEngine> {
        &self.arp
    }

    pub fn processes(&self) -> &ProcessManager {
        &self.processes
    }

    /// Registers the interface and its connected route.
    pub async fn add_interface(&self, iface: Interface) -> Result<(), RouterError> {
        let connected = RouteEntry::connected(iface.network(), iface.mask, iface.name.clone());
        info!(NIC = %iface.name, cidr = %iface.cidr(), mac = %iface.mac, "Adding interface");
        self.interfaces.add(iface).await?;
        self.rib.upsert_connected(connected).await;
        Ok(())
    }

    /// Stops everything running on the interface, then forgets it.
    pub async fn remove_interface(&self, name: &str) -> Result<Interface, RouterError> {
        if self.interfaces.get(name).await.is_none() {
            return Err(InterfaceError::Unknown(name.to_string()).into());
        }
        self.unbind(name).await;
        if self.rip.is_enabled(name).await {
            self.rip.disable_on_interface(name).await?;
        }
        if self.dhcp.is_enabled(name).await {
            self.dhcp.disable(name).await?;
        }
        let iface = self.interfaces.remove(name).await?;
        self.rib.remove_connected(iface.network(), iface.mask).await;
        info!(NIC = name, "Interface removed");
        Ok(iface)
    }

    pub async fn interfaces(&self) -> Vec<Interface> {
        self.interfaces.all().await
    }

    /// Feeds frames from `rx` into [`Router::on_frame`] until unbound or the
    /// channel closes.
    pub async fn bind(self: &Arc<Self>, iface: &str, rx: Receiver<EthernetPacket>) -> Result<Pid, RouterError> {
        if self.interfaces.get(iface).await.is_none() {
            return Err(InterfaceError::Unknown(iface.to_string()).into());
        }
        let mut receivers = self.receivers.lock().await;
        if receivers.contains_key(iface) {
            return Err(RouterError::AlreadyBound(iface.to_string()));
        }
        let this = self.clone();
        let name = iface.to_string();
        let pid = self
            .processes
            .add(format!("rx {iface}"), move |_, mut stop| async move {
                loop {
                    tokio::select! {
                        _ = stop.stopped() => break,
                        frame = rx.recv_async() => match frame {
                            Ok(frame) => {
                                this.on_frame(&name, frame).await;
                            }
                            Err(_) => {
                                warn!(NIC = %name, "Receive queue disconnected");
                                break;
                            }
                        }
                    }
                }
            })
            .await;
        receivers.insert(iface.to_string(), pid);
        debug!(NIC = iface, pid, "Receive queue bound");
        Ok(pid)
    }

    /// Stops the receive loop, waiting at most the configured unbind timeout.
    pub async fn unbind(&self, iface: &str) -> StopOutcome {
        let Some(pid) = self.receivers.lock().await.remove(iface) else {
            return StopOutcome::NotRunning;
        };
        let outcome = self
            .processes
            .stop_process(pid, self.config.unbind_timeout)
            .await;
        debug!(NIC = iface, pid, ?outcome, "Receive queue unbound");
        outcome
    }

    /// Stops every background task.
    pub async fn shutdown(&self) {
        self.receivers.lock().await.clear();
        self.processes.stop_all(self.config.unbind_timeout).await;
    }

    /// Routes one received frame to the component that handles it.
    pub async fn on_frame(&self, iface: &str, frame: EthernetPacket) -> Dispatch {
        let Some(nic) = self.interfaces.get(iface).await else {
            warn!(NIC = iface, "Frame on unknown interface");
            return Dispatch::Ignored;
        };
        let dst = frame.get_dest();
        if dst.is_unicast() && dst != nic.mac {
            trace!(NIC = iface, %dst, "Frame for another station");
            return Dispatch::Ignored;
        }

        match frame.get_ether_type() {
            EtherType::ARP => {
                self.arp.on_ethernet_frame(&frame, iface).await;
                Dispatch::Arp
            }
            EtherType::IP_V4 => {
                if let Some(dispatch) = self.local_udp(&nic, &frame).await {
                    return dispatch;
                }
                Dispatch::Forward(self.forwarder.on_ipv4_frame(&frame, iface).await)
            }
            other => {
                trace!(NIC = iface, ether_type = ?other, "Unhandled ether type");
                Dispatch::Ignored
            }
        }
    }

    /// RIP and DHCP server traffic addressed to this interface. DHCP is
    /// answered from its own task.
    async fn local_udp(&self, nic: &Interface, frame: &EthernetPacket) -> Option<Dispatch> {
        let packet = Ipv4Packet::from_vec(&frame.payload)?;
        if packet.header.protocol != ProtocolType::UDP {
            return None;
        }
        let dst = packet.header.destination;
        let udp = UdpPacket::from_vec(&packet.payload)?;
        match udp.destination_port {
            RIP_PORT if dst == addr::RIP_MULTICAST || dst == nic.addr => {
                self.rip
                    .on_rip_packet(&nic.name, packet.header.source, &udp.payload)
                    .await;
                Some(Dispatch::Rip)
            }
            SERVER_PORT if dst.is_broadcast() || dst == nic.addr => {
                // The free-address scan waits on ARP replies that arrive
                // through this same receive loop.
                let dhcp = self.dhcp.clone();
                let iface = nic.name.clone();
                let src_mac = frame.get_source();
                tokio::spawn(async move {
                    dhcp.on_dhcp_packet(&iface, src_mac, &udp.payload).await;
                });
                Some(Dispatch::Dhcp)
            }
            _ => None,
        }
    }

    pub async fn routes(&self) -> Vec<RouteEntry> {
        self.rib.snapshot().await
    }

    pub async fn print_routes(&self) -> prettytable::Table {
        self.rib.print().await
    }

    pub async fn add_static_route(
        &self,
        prefix: Cidr,
        next_hop: Option<IpV4Addr>,
        out_if: Option<String>,
    ) -> Result<RouteEntry, RouterError> {
        if let Some(name) = &out_if {
            if self.interfaces.get(name).await.is_none() {
                return Err(InterfaceError::Unknown(name.clone()).into());
            }
        }
        let route = RouteEntry::static_route(prefix.addr, prefix.mask, next_hop, out_if);
        Ok(self.rib.upsert_static(route).await?)
    }

    pub async fn remove_static_route(&self, prefix: Cidr) -> Option<RouteEntry> {
        self.rib.remove_static(prefix.addr, prefix.mask).await
    }

    pub async fn enable_dhcp(&self, iface: &str, config: DhcpServerConfig) -> Result<(), RouterError> {
        Ok(self.dhcp.enable(iface, config).await?)
    }

    pub async fn disable_dhcp(&self, iface: &str) -> Result<(), RouterError> {
        Ok(self.dhcp.disable(iface).await?)
    }

    pub async fn add_manual_binding(&self, iface: &str, mac: Mac, ip: IpV4Addr) -> Result<(), RouterError> {
        Ok(self.dhcp.add_manual_binding(iface, mac, ip).await?)
    }

    pub async fn remove_manual_binding(&self, iface: &str, mac: Mac) -> Result<Option<IpV4Addr>, RouterError> {
        Ok(self.dhcp.remove_manual_binding(iface, mac).await?)
    }

    pub async fn manual_bindings(&self, iface: &str) -> Result<Vec<(Mac, IpV4Addr)>, RouterError> {
        Ok(self.dhcp.manual_bindings(iface).await?)
    }

    pub async fn leases(&self, iface: &str) -> Result<Vec<LeaseInfo>, RouterError> {
        Ok(self.dhcp.leases(iface).await?)
    }

    pub async fn all_leases(&self) -> Vec<LeaseInfo> {
        self.dhcp.all_leases().await
    }

    pub async fn print_leases(&self) -> prettytable::Table {
        self.dhcp.print_leases().await
    }

    pub async fn enable_rip(&self, iface: &str, policy: HorizonPolicy) -> Result<(), RouterError> {
        Ok(self.rip.enable_on_interface(iface, policy).await?)
    }

    pub async fn disable_rip(&self, iface: &str) -> Result<(), RouterError> {
        Ok(self.rip.disable_on_interface(iface).await?)
    }

    pub async fn set_proxy_arp(&self, enabled: bool) {
        info!(enabled, "Proxy ARP");
        self.arp.proxy().write().await.enabled = enabled;
    }

    pub async fn set_proxy_arp_on(&self, iface: &str, enabled: bool) -> Result<(), RouterError> {
        if self.interfaces.get(iface).await.is_none() {
            return Err(InterfaceError::Unknown(iface.to_string()).into());
        }
        info!(NIC = iface, enabled, "Proxy ARP");
        self.arp.proxy().write().await.set_interface(iface, enabled);
        Ok(())
    }

    pub async fn resolve(&self, iface: &str, target: IpV4Addr, timeout: Duration) -> Result<Mac, RouterError> {
        Ok(self.arp.resolve_timeout(iface, target, timeout).await?)
    }

    pub async fn arp_entry(&self, ip: IpV4Addr) -> Option<ArpEntry> {
        self.arp.cache().get(ip).await
    }

    pub async fn delete_arp_entry(&self, ip: IpV4Addr) -> Option<ArpEntry> {
        self.arp.cache().remove(ip).await
    }

    pub async fn arp_table(&self) -> Vec<ArpEntry> {
        self.arp.cache().snapshot().await
    }

    pub async fn print_arp(&self) -> prettytable::Table {
        self.arp.cache().print().await
    }
}
