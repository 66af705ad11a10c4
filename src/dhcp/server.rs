use std::{collections::HashMap, fmt::Display, sync::Arc, time::Duration};

use derivative::Derivative;
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};
use tracing::{debug, info, trace, warn};

use super::{
    conflict::DhcpIpConflictDetector,
    packet::{DhcpMessage, DhcpMessageType, DhcpReply, ReplyKind, CLIENT_PORT, SERVER_PORT},
};
use crate::{
    interfaces::InterfaceRegistry,
    link::tx::FrameTx,
    mac::{self, Mac},
    network::ipv4::{
        addr::{self, IpV4Addr, IpV4Mask},
        packet::DEFAULT_TTL,
    },
    transport::udp::{build_frame, UdpEndpoints},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DhcpMode {
    /// Operator bindings only.
    Manual,
    /// First free address, kept for the server's lifetime.
    Automatic,
    /// Time limited leases.
    Dynamic,
}

impl Display for DhcpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Manual => "MANUAL",
            Self::Automatic => "AUTOMATIC",
            Self::Dynamic => "DYNAMIC",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpServerConfig {
    pub pool_start: IpV4Addr,
    pub pool_end: IpV4Addr,
    pub mask: IpV4Mask,
    pub gateway: IpV4Addr,
    pub mode: DhcpMode,
    /// Offered in automatic and dynamic mode; dynamic leases expire after it.
    pub lease_time: Duration,
    pub manual_lease_time: Duration,
    /// Bound on each conflict probe during the free-address scan.
    pub probe_timeout: Duration,
}

impl DhcpServerConfig {
    /// Dynamic and automatic offers carry a one hour lease, manual ones a
    /// day. Each conflict check waits at most 20 s.
    pub fn new(
        pool_start: IpV4Addr,
        pool_end: IpV4Addr,
        mask: IpV4Mask,
        gateway: IpV4Addr,
        mode: DhcpMode,
    ) -> Self {
        Self {
            pool_start,
            pool_end,
            mask,
            gateway,
            mode,
            lease_time: Duration::from_secs(3600),
            manual_lease_time: Duration::from_secs(24 * 3600),
            probe_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_lease_time(mut self, lease_time: Duration) -> Self {
        self.lease_time = lease_time;
        self
    }

    pub fn with_manual_lease_time(mut self, lease_time: Duration) -> Self {
        self.manual_lease_time = lease_time;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn in_pool(&self, ip: IpV4Addr) -> bool {
        self.pool_start <= ip && ip <= self.pool_end
    }
}

/// One row of a lease listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    pub iface: String,
    pub ip: IpV4Addr,
    pub mac: Mac,
    /// Dynamic leases only.
    pub remaining: Option<Duration>,
    pub mode: DhcpMode,
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    ip: IpV4Addr,
    expires: Instant,
}

#[derive(Debug, Default)]
struct Bindings {
    manual: HashMap<Mac, IpV4Addr>,
    automatic: HashMap<Mac, IpV4Addr>,
    dynamic: HashMap<Mac, Lease>,
}

impl Bindings {
    /// Holder of `ip` in any table. Expired leases hold nothing.
    fn holder(&self, ip: IpV4Addr, now: Instant) -> Option<Mac> {
        let bound = |table: &HashMap<Mac, IpV4Addr>| {
            table
                .iter()
                .find_map(|(mac, bound)| (*bound == ip).then_some(*mac))
        };
        bound(&self.manual)
            .or_else(|| bound(&self.automatic))
            .or_else(|| {
                self.dynamic
                    .iter()
                    .find_map(|(mac, l)| (l.ip == ip && l.expires > now).then_some(*mac))
            })
    }
}

/// DHCP state for one interface.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DhcpServer {
    iface: String,
    config: DhcpServerConfig,
    bindings: RwLock<Bindings>,
    /// Serializes free-address scans.
    #[derivative(Debug = "ignore")]
    allocation: Mutex<()>,
    #[derivative(Debug = "ignore")]
    detector: Arc<DhcpIpConflictDetector>,
    #[derivative(Debug = "ignore")]
    interfaces: Arc<InterfaceRegistry>,
    #[derivative(Debug = "ignore")]
    tx: Arc<dyn FrameTx>,
}

impl DhcpServer {
    pub fn new(
        iface: impl Into<String>,
        config: DhcpServerConfig,
        detector: Arc<DhcpIpConflictDetector>,
        interfaces: Arc<InterfaceRegistry>,
        tx: Arc<dyn FrameTx>,
    ) -> Self {
        Self {
            iface: iface.into(),
            config,
            bindings: RwLock::new(Bindings::default()),
            allocation: Mutex::new(()),
            detector,
            interfaces,
            tx,
        }
    }

    pub fn config(&self) -> &DhcpServerConfig {
        &self.config
    }

    /// Handles one client payload and returns the reply that was sent, if
    /// any. The client is identified by chaddr, falling back to the frame's
    /// source MAC.
    pub async fn handle(&self, src_mac: Mac, payload: &[u8]) -> Option<DhcpReply> {
        let msg = DhcpMessage::parse(payload);
        let client = msg.chaddr.filter(|m| !m.is_zero()).unwrap_or(src_mac);
        debug!(NIC = %self.iface, mode = %self.config.mode, kind = ?msg.kind, xid = msg.xid, %client, "DHCP message");

        let reply = match msg.kind {
            DhcpMessageType::Discover => self.on_discover(client, &msg).await?,
            DhcpMessageType::Request => self.on_request(client, &msg).await?,
            DhcpMessageType::Release => {
                self.on_release(client).await;
                return None;
            }
            DhcpMessageType::Other => return None,
        };
        self.send(&reply).await;
        Some(reply)
    }

    async fn on_discover(&self, client: Mac, msg: &DhcpMessage) -> Option<DhcpReply> {
        let Some(offer) = self.choose(client).await else {
            info!(NIC = %self.iface, %client, "No address available");
            return None;
        };
        info!(NIC = %self.iface, %client, %offer, "OFFER");
        self.reply(ReplyKind::Offer, msg.xid, client, offer).await
    }

    async fn on_request(&self, client: Mac, msg: &DhcpMessage) -> Option<DhcpReply> {
        let requested = match msg.requested_ip {
            Some(ip) => ip,
            None => self.choose(client).await?,
        };

        let now = Instant::now();
        let mut bindings = self.bindings.write().await;
        let ip = match self.config.mode {
            DhcpMode::Manual => {
                if bindings.manual.get(&client) != Some(&requested) {
                    warn!(NIC = %self.iface, %client, %requested, "Requested address is not the manual binding");
                    return None;
                }
                requested
            }
            DhcpMode::Automatic | DhcpMode::Dynamic => {
                if !self.config.in_pool(requested) {
                    warn!(NIC = %self.iface, %client, %requested, "Requested address outside the pool");
                    return None;
                }
                if let Some(holder) = bindings.holder(requested, now).filter(|h| *h != client) {
                    warn!(NIC = %self.iface, %client, %requested, %holder, "Requested address held by another client");
                    return None;
                }
                if self.config.mode == DhcpMode::Automatic {
                    *bindings.automatic.entry(client).or_insert(requested)
                } else {
                    bindings.dynamic.insert(
                        client,
                        Lease {
                            ip: requested,
                            expires: now + self.config.lease_time,
                        },
                    );
                    requested
                }
            }
        };
        drop(bindings);

        info!(NIC = %self.iface, %client, %ip, "ACK");
        self.reply(ReplyKind::Ack, msg.xid, client, ip).await
    }

    async fn on_release(&self, client: Mac) {
        match self.config.mode {
            DhcpMode::Dynamic => {
                if let Some(lease) = self.bindings.write().await.dynamic.remove(&client) {
                    info!(NIC = %self.iface, %client, ip = %lease.ip, "Lease released");
                }
            }
            DhcpMode::Manual | DhcpMode::Automatic => {
                debug!(NIC = %self.iface, %client, mode = %self.config.mode, "RELEASE ignored");
            }
        }
    }

    async fn choose(&self, client: Mac) -> Option<IpV4Addr> {
        match self.config.mode {
            DhcpMode::Manual => self.bindings.read().await.manual.get(&client).copied(),
            DhcpMode::Automatic => {
                let _allocation = self.allocation.lock().await;
                if let Some(ip) = self.bindings.read().await.automatic.get(&client) {
                    return Some(*ip);
                }
                let ip = self.find_free_ip().await?;
                self.bindings.write().await.automatic.insert(client, ip);
                Some(ip)
            }
            DhcpMode::Dynamic => {
                let _allocation = self.allocation.lock().await;
                {
                    let now = Instant::now();
                    let mut bindings = self.bindings.write().await;
                    if let Some(lease) = bindings.dynamic.get_mut(&client) {
                        if lease.expires > now {
                            lease.expires = now + self.config.lease_time;
                            return Some(lease.ip);
                        }
                    }
                }
                let ip = self.find_free_ip().await?;
                self.bindings.write().await.dynamic.insert(
                    client,
                    Lease {
                        ip,
                        expires: Instant::now() + self.config.lease_time,
                    },
                );
                Some(ip)
            }
        }
    }

    /// First pool address that is neither bound here nor answering ARP. Each
    /// probe holds this task for up to `probe_timeout`.
    async fn find_free_ip(&self) -> Option<IpV4Addr> {
        let own = self.interfaces.get(&self.iface).await.map(|i| i.addr);
        let (start, end) = (self.config.pool_start.to_u32(), self.config.pool_end.to_u32());
        for ip in (start..=end).map(IpV4Addr::from_u32) {
            if Some(ip) == own || ip == self.config.gateway {
                continue;
            }
            if self.bindings.read().await.holder(ip, Instant::now()).is_some() {
                continue;
            }
            match tokio::time::timeout(
                self.config.probe_timeout,
                self.detector.probe_ip(&self.iface, ip),
            )
            .await
            {
                Ok(false) => return Some(ip),
                Ok(true) => debug!(NIC = %self.iface, %ip, "Address busy according to ARP"),
                Err(_) => debug!(NIC = %self.iface, %ip, "Conflict probe timed out, skipping"),
            }
        }
        None
    }

    async fn reply(&self, kind: ReplyKind, xid: u32, client: Mac, yiaddr: IpV4Addr) -> Option<DhcpReply> {
        let Some(nic) = self.interfaces.get(&self.iface).await else {
            warn!(NIC = %self.iface, "DHCP interface vanished");
            return None;
        };
        let lease = match self.config.mode {
            DhcpMode::Manual => self.config.manual_lease_time,
            _ => self.config.lease_time,
        };
        Some(DhcpReply {
            kind,
            xid,
            client_mac: client,
            yiaddr,
            server_id: nic.addr,
            mask: self.config.mask,
            gateway: self.config.gateway,
            lease,
        })
    }

    async fn send(&self, reply: &DhcpReply) {
        let Some(nic) = self.interfaces.get(&self.iface).await else {
            return;
        };
        let endpoints = UdpEndpoints {
            src_mac: nic.mac,
            dst_mac: mac::BROADCAST,
            src_ip: nic.addr,
            dst_ip: addr::BROADCAST,
            src_port: SERVER_PORT,
            dst_port: CLIENT_PORT,
            ttl: DEFAULT_TTL,
        };
        let Some(frame) = build_frame(endpoints, reply.to_vec()) else {
            return;
        };
        trace!(NIC = %self.iface, ?reply, "Sending DHCP reply");
        if let Err(e) = self.tx.send(&self.iface, frame).await {
            warn!(NIC = %self.iface, "DHCP reply not sent: {e}");
        }
    }

    pub async fn add_manual(&self, mac: Mac, ip: IpV4Addr) {
        self.bindings.write().await.manual.insert(mac, ip);
    }

    pub async fn remove_manual(&self, mac: Mac) -> Option<IpV4Addr> {
        self.bindings.write().await.manual.remove(&mac)
    }

    /// Sorted by MAC.
    pub async fn manual_bindings(&self) -> Vec<(Mac, IpV4Addr)> {
        let mut list: Vec<_> = self
            .bindings
            .read()
            .await
            .manual
            .iter()
            .map(|(m, ip)| (*m, *ip))
            .collect();
        list.sort();
        list
    }

    /// Every binding and lease, sorted by address. Expired dynamic leases
    /// show zero remaining until they are replaced.
    pub async fn leases(&self) -> Vec<LeaseInfo> {
        let now = Instant::now();
        let bindings = self.bindings.read().await;
        let row = |mac: &Mac, ip: &IpV4Addr, remaining, mode| LeaseInfo {
            iface: self.iface.clone(),
            ip: *ip,
            mac: *mac,
            remaining,
            mode,
        };
        let mut rows: Vec<_> = bindings
            .manual
            .iter()
            .map(|(m, ip)| row(m, ip, None, DhcpMode::Manual))
            .chain(
                bindings
                    .automatic
                    .iter()
                    .map(|(m, ip)| row(m, ip, None, DhcpMode::Automatic)),
            )
            .chain(bindings.dynamic.iter().map(|(m, l)| {
                row(
                    m,
                    &l.ip,
                    Some(l.expires.saturating_duration_since(now)),
                    DhcpMode::Dynamic,
                )
            }))
            .collect();
        rows.sort_by_key(|r| (r.ip, r.mac));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ArpTimers,
        dhcp::packet::tests::client_message,
        interfaces::Interface,
        link::{
            ethernet::{ethertype::EtherType, packet::EthernetPacket},
            tx::ChannelTx,
        },
        network::{
            arp::{proxy::ProxyArpConfigInner, ArpEngine},
            ipv4::packet::Ipv4Packet,
        },
        route::rib::Rib,
        transport::udp::packet::UdpPacket,
    };
    use crate::dhcp::packet::{option, options};

    const CLIENT: Mac = Mac::new([2, 0, 0, 0, 0, 0xc1]);
    const OTHER: Mac = Mac::new([2, 0, 0, 0, 0, 0xc2]);
    const SERVER_IP: IpV4Addr = IpV4Addr::new([10, 0, 0, 1]);

    fn ip(last: u8) -> IpV4Addr {
        IpV4Addr::new([10, 0, 0, last])
    }

    struct Fixture {
        server: DhcpServer,
        arp: Arc<ArpEngine>,
        wire: flume::Receiver<EthernetPacket>,
    }

    async fn fixture(mode: DhcpMode) -> Fixture {
        fixture_with(mode, |config| config).await
    }

    async fn fixture_with(
        mode: DhcpMode,
        configure: impl FnOnce(DhcpServerConfig) -> DhcpServerConfig,
    ) -> Fixture {
        let interfaces = Arc::new(InterfaceRegistry::new());
        interfaces
            .add(Interface::new(
                "eth0",
                Mac::new([2, 0, 0, 0, 0, 1]),
                SERVER_IP,
                IpV4Mask::new(24).unwrap(),
            ))
            .await
            .unwrap();
        let tx = Arc::new(ChannelTx::new());
        let wire = tx.bind("eth0").await;
        let arp = Arc::new(ArpEngine::new(
            interfaces.clone(),
            Arc::new(Rib::new()),
            tx.clone(),
            ArpTimers::default(),
            Arc::new(RwLock::new(ProxyArpConfigInner::default())),
        ));
        let detector = Arc::new(DhcpIpConflictDetector::new(arp.clone()));
        let config = configure(DhcpServerConfig::new(
            ip(10),
            ip(20),
            IpV4Mask::new(24).unwrap(),
            SERVER_IP,
            mode,
        ));
        Fixture {
            server: DhcpServer::new("eth0", config, detector, interfaces, tx),
            arp,
            wire,
        }
    }

    async fn discover(server: &DhcpServer, mac: Mac) -> Option<DhcpReply> {
        server.handle(mac, &client_message(1, 1, mac, None)).await
    }

    async fn request(server: &DhcpServer, mac: Mac, ip: Option<IpV4Addr>) -> Option<DhcpReply> {
        server.handle(mac, &client_message(3, 2, mac, ip)).await
    }

    async fn release(server: &DhcpServer, mac: Mac) {
        assert!(server.handle(mac, &client_message(7, 3, mac, None)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_offers_first_free() {
        let f = fixture(DhcpMode::Dynamic).await;
        let offer = discover(&f.server, CLIENT).await.unwrap();
        assert_eq!(offer.kind, ReplyKind::Offer);
        assert_eq!(offer.yiaddr, ip(10));
        assert_eq!(offer.server_id, SERVER_IP);
        assert_eq!(offer.lease, Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_skips_reachable_address() {
        let f = fixture(DhcpMode::Dynamic).await;
        f.arp.cache().learned(ip(10), OTHER).await;
        let offer = discover(&f.server, CLIENT).await.unwrap();
        assert_eq!(offer.yiaddr, ip(11));
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_lease_lifecycle() {
        let f = fixture(DhcpMode::Dynamic).await;
        let offer = discover(&f.server, CLIENT).await.unwrap();
        let ack = request(&f.server, CLIENT, Some(offer.yiaddr)).await.unwrap();
        assert_eq!((ack.kind, ack.yiaddr), (ReplyKind::Ack, ip(10)));

        // Another client does not get the leased address.
        let second = discover(&f.server, OTHER).await.unwrap();
        assert_eq!(second.yiaddr, ip(11));
        assert!(request(&f.server, OTHER, Some(ip(10))).await.is_none());

        // Same client is re-offered its lease without probing.
        assert_eq!(discover(&f.server, CLIENT).await.unwrap().yiaddr, ip(10));

        let leases = f.server.leases().await;
        assert_eq!(leases.len(), 2);
        assert_eq!(leases[0].mac, CLIENT);
        assert_eq!(leases[0].mode, DhcpMode::Dynamic);
        assert!(leases[0].remaining.unwrap() <= Duration::from_secs(3600));

        release(&f.server, CLIENT).await;
        assert_eq!(f.server.leases().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_reusable() {
        let f = fixture(DhcpMode::Dynamic).await;
        request(&f.server, CLIENT, Some(ip(10))).await.unwrap();
        tokio::time::advance(Duration::from_secs(3601)).await;
        assert_eq!(discover(&f.server, OTHER).await.unwrap().yiaddr, ip(10));
    }

    fn lease_option(frame: &EthernetPacket) -> Option<u32> {
        let packet = Ipv4Packet::from_vec(&frame.payload)?;
        let udp = UdpPacket::from_vec(&packet.payload)?;
        let value = options(&udp.payload).find(|(code, _)| *code == option::LEASE_TIME)?.1;
        Some(u32::from_be_bytes(value.try_into().ok()?))
    }

    #[tokio::test(start_paused = true)]
    async fn configured_lease_times_reach_the_wire() {
        let f = fixture_with(DhcpMode::Dynamic, |c| {
            c.with_lease_time(Duration::from_secs(120))
        })
        .await;
        let ack = request(&f.server, CLIENT, Some(ip(10))).await.unwrap();
        assert_eq!(ack.lease, Duration::from_secs(120));
        assert_eq!(lease_option(&f.wire.try_recv().unwrap()), Some(120));

        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(f.server.leases().await[0].remaining, Some(Duration::ZERO));

        let f = fixture_with(DhcpMode::Manual, |c| {
            c.with_manual_lease_time(Duration::from_secs(600))
        })
        .await;
        f.server.add_manual(CLIENT, ip(50)).await;
        let offer = discover(&f.server, CLIENT).await.unwrap();
        assert_eq!(offer.lease, Duration::from_secs(600));
        assert_eq!(lease_option(&f.wire.try_recv().unwrap()), Some(600));
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_wait_bounds_each_candidate() {
        // Shorter than the ARP retry schedule, so no candidate is ever
        // confirmed free.
        let f = fixture_with(DhcpMode::Dynamic, |c| {
            c.with_probe_timeout(Duration::from_millis(500))
        })
        .await;
        let start = Instant::now();
        assert!(discover(&f.server, CLIENT).await.is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500 * 11), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "{elapsed:?}");
        assert!(f.server.leases().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode() {
        let f = fixture(DhcpMode::Manual).await;
        assert!(discover(&f.server, CLIENT).await.is_none());

        f.server.add_manual(CLIENT, ip(50)).await;
        let offer = discover(&f.server, CLIENT).await.unwrap();
        assert_eq!(offer.yiaddr, ip(50));
        assert_eq!(offer.lease, Duration::from_secs(86400));

        assert!(request(&f.server, CLIENT, Some(ip(51))).await.is_none());
        assert_eq!(request(&f.server, CLIENT, Some(ip(50))).await.unwrap().yiaddr, ip(50));
        assert_eq!(request(&f.server, CLIENT, None).await.unwrap().yiaddr, ip(50));

        release(&f.server, CLIENT).await;
        assert_eq!(f.server.manual_bindings().await, vec![(CLIENT, ip(50))]);
        assert_eq!(f.server.remove_manual(CLIENT).await, Some(ip(50)));
        assert!(request(&f.server, CLIENT, Some(ip(50))).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn automatic_mode_is_permanent() {
        let f = fixture(DhcpMode::Automatic).await;
        let offer = discover(&f.server, CLIENT).await.unwrap();
        assert_eq!(offer.yiaddr, ip(10));
        assert_eq!(request(&f.server, CLIENT, Some(ip(10))).await.unwrap().yiaddr, ip(10));
        // Idempotent; a different requested address keeps the binding.
        assert_eq!(request(&f.server, CLIENT, Some(ip(12))).await.unwrap().yiaddr, ip(10));

        release(&f.server, CLIENT).await;
        let leases = f.server.leases().await;
        assert_eq!(leases.len(), 1);
        assert_eq!((leases[0].ip, leases[0].remaining), (ip(10), None));

        tokio::time::advance(Duration::from_secs(100_000)).await;
        assert_eq!(discover(&f.server, CLIENT).await.unwrap().yiaddr, ip(10));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_drops_discover() {
        let f = fixture(DhcpMode::Automatic).await;
        for last in 10..=20 {
            f.arp.cache().learned(ip(last), OTHER).await;
        }
        assert!(discover(&f.server, CLIENT).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_goes_out_as_broadcast_udp() {
        let f = fixture(DhcpMode::Manual).await;
        f.server.add_manual(CLIENT, ip(50)).await;
        discover(&f.server, CLIENT).await.unwrap();

        let frame = f
            .wire
            .drain()
            .find(|fr| fr.get_ether_type() == EtherType::IP_V4)
            .unwrap();
        assert!(frame.get_dest().is_broadcast());
        let ipv4 = Ipv4Packet::from_vec(&frame.payload).unwrap();
        assert_eq!(ipv4.header.source, SERVER_IP);
        assert_eq!(ipv4.header.destination, addr::BROADCAST);
        assert_eq!(ipv4.header.time_to_live, 64);
        let udp = UdpPacket::from_vec(&ipv4.payload).unwrap();
        assert_eq!((udp.source_port, udp.destination_port), (67, 68));
        assert_eq!(&udp.payload[16..20], &ip(50).as_arr());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_discovers_get_distinct_addresses() {
        let f = Arc::new(fixture(DhcpMode::Dynamic).await);
        let a = {
            let f = f.clone();
            tokio::spawn(async move { discover(&f.server, CLIENT).await })
        };
        let b = {
            let f = f.clone();
            tokio::spawn(async move { discover(&f.server, OTHER).await })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_ne!(a.yiaddr, b.yiaddr);
    }
}
