use std::{fmt::Display, sync::Arc};

use derivative::Derivative;
use tracing::{debug, trace, warn};

use crate::{
    interfaces::InterfaceRegistry,
    link::{
        ethernet::{ethertype::EtherType, packet::EthernetPacket},
        tx::FrameTx,
    },
    network::{
        arp::ArpEngine,
        ipv4::{addr::IpV4Addr, packet::Ipv4Packet},
    },
    route::rib::Rib,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    NotUnicast,
    /// Addressed to the receiving interface.
    Local,
    TtlExpired,
    NoRoute,
    /// The route sends it back where it came from.
    SameInterface,
    UnknownInterface,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Malformed => "malformed",
            Self::NotUnicast => "destination not unicast",
            Self::Local => "addressed to us",
            Self::TtlExpired => "TTL expired",
            Self::NoRoute => "no route",
            Self::SameInterface => "route points back to the ingress interface",
            Self::UnknownInterface => "unknown interface",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Handed to ARP resolution towards `next_hop` on `out_if`.
    Forwarding { out_if: String, next_hop: IpV4Addr },
    Dropped(DropReason),
}

/// Routes transit IPv4 packets. Nothing is ever answered with ICMP.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Forwarder {
    interfaces: Arc<InterfaceRegistry>,
    rib: Arc<Rib>,
    #[derivative(Debug = "ignore")]
    arp: Arc<ArpEngine>,
    #[derivative(Debug = "ignore")]
    tx: Arc<dyn FrameTx>,
}

impl Forwarder {
    pub fn new(
        interfaces: Arc<InterfaceRegistry>,
        rib: Arc<Rib>,
        arp: Arc<ArpEngine>,
        tx: Arc<dyn FrameTx>,
    ) -> Self {
        Self {
            interfaces,
            rib,
            arp,
            tx,
        }
    }

    /// Decides synchronously; resolution and transmission continue in a
    /// spawned task.
    pub async fn on_ipv4_frame(&self, frame: &EthernetPacket, in_if: &str) -> Verdict {
        let verdict = self.forward(frame, in_if).await;
        match &verdict {
            Verdict::Dropped(reason) => trace!(NIC = in_if, %reason, "IPv4 packet dropped"),
            Verdict::Forwarding { out_if, next_hop } => {
                trace!(NIC = in_if, %out_if, %next_hop, "Forwarding IPv4 packet")
            }
        }
        verdict
    }

    async fn forward(&self, frame: &EthernetPacket, in_if: &str) -> Verdict {
        if frame.get_ether_type() != EtherType::IP_V4 {
            return Verdict::Dropped(DropReason::Malformed);
        }
        let Some(mut packet) = Ipv4Packet::from_vec(&frame.payload) else {
            return Verdict::Dropped(DropReason::Malformed);
        };
        let dst = packet.header.destination;
        if !dst.is_unicast() {
            return Verdict::Dropped(DropReason::NotUnicast);
        }
        let Some(nic) = self.interfaces.get(in_if).await else {
            return Verdict::Dropped(DropReason::UnknownInterface);
        };
        if dst == nic.addr {
            return Verdict::Dropped(DropReason::Local);
        }
        if packet.header.time_to_live <= 1 {
            return Verdict::Dropped(DropReason::TtlExpired);
        }

        let Some(route) = self.rib.lookup(dst).await else {
            return Verdict::Dropped(DropReason::NoRoute);
        };
        let Some(out_if) = route.out_if().map(str::to_string) else {
            return Verdict::Dropped(DropReason::NoRoute);
        };
        if out_if == in_if {
            return Verdict::Dropped(DropReason::SameInterface);
        }
        let Some(out_nic) = self.interfaces.get(&out_if).await else {
            return Verdict::Dropped(DropReason::UnknownInterface);
        };

        packet.header.time_to_live -= 1;
        let next_hop = route.next_hop().unwrap_or(dst);
        let arp = self.arp.clone();
        let tx = self.tx.clone();
        let bytes = packet.to_vec();
        let iface = out_if.clone();
        tokio::spawn(async move {
            let mac = match arp.resolve(&iface, next_hop).await {
                Ok(mac) => mac,
                Err(e) => {
                    debug!(NIC = %iface, %next_hop, "Next hop unresolved, dropping: {e}");
                    return;
                }
            };
            let Some(frame) = EthernetPacket::new_ip_v4(mac, out_nic.mac, bytes) else {
                warn!(NIC = %iface, "Packet does not fit a frame, dropping");
                return;
            };
            if let Err(e) = tx.send(&iface, frame).await {
                warn!(NIC = %iface, "Forwarded packet not sent: {e}");
            }
        });

        Verdict::Forwarding { out_if, next_hop }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ArpTimers,
        interfaces::Interface,
        link::tx::ChannelTx,
        mac::{self, Mac},
        network::{
            arp::proxy::ProxyArpConfigInner,
            ipv4::{
                addr::IpV4Mask,
                packet::{IpV4Header, DEFAULT_TTL},
                protocol::ProtocolType,
            },
        },
        route::{RouteEntry, RIP_INFINITY},
    };
    use std::time::Duration;
    use tokio::sync::RwLock;

    const MAC0: Mac = Mac::new([2, 0, 0, 0, 0, 0xa0]);
    const MAC1: Mac = Mac::new([2, 0, 0, 0, 0, 0xa1]);
    const HOST: Mac = Mac::new([2, 0, 0, 0, 0, 0x77]);

    fn ip(s: &str) -> IpV4Addr {
        s.parse().unwrap()
    }

    struct Fixture {
        fwd: Forwarder,
        arp: Arc<ArpEngine>,
        rib: Arc<Rib>,
        eth1: flume::Receiver<EthernetPacket>,
    }

    async fn fixture() -> Fixture {
        let interfaces = Arc::new(InterfaceRegistry::new());
        let rib = Arc::new(Rib::new());
        for (name, m, addr) in [("eth0", MAC0, "10.0.0.1"), ("eth1", MAC1, "10.0.1.1")] {
            let nic = Interface::new(name, m, ip(addr), IpV4Mask::new(24).unwrap());
            rib.upsert_connected(RouteEntry::connected(nic.network(), nic.mask, name))
                .await;
            interfaces.add(nic).await.unwrap();
        }
        let tx = Arc::new(ChannelTx::new());
        let eth1 = tx.bind("eth1").await;
        let arp = Arc::new(ArpEngine::new(
            interfaces.clone(),
            rib.clone(),
            tx.clone(),
            ArpTimers::default(),
            Arc::new(RwLock::new(ProxyArpConfigInner::default())),
        ));
        Fixture {
            fwd: Forwarder::new(interfaces, rib.clone(), arp.clone(), tx),
            arp,
            rib,
            eth1,
        }
    }

    fn frame(dst: &str, ttl: u8) -> EthernetPacket {
        let packet = Ipv4Packet::new(
            IpV4Header::new(ProtocolType::UDP, ip("10.0.0.5"), ip(dst), ttl),
            vec![1, 2, 3, 4],
        );
        EthernetPacket::new_ip_v4(MAC0, HOST, packet.to_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_with_decremented_ttl() {
        let f = fixture().await;
        f.arp.cache().learned(ip("10.0.1.9"), HOST).await;

        let verdict = f.fwd.on_ipv4_frame(&frame("10.0.1.9", DEFAULT_TTL), "eth0").await;
        assert_eq!(
            verdict,
            Verdict::Forwarding {
                out_if: "eth1".into(),
                next_hop: ip("10.0.1.9")
            }
        );

        let out = tokio::time::timeout(Duration::from_secs(1), f.eth1.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.get_dest(), HOST);
        assert_eq!(out.get_source(), MAC1);
        let packet = Ipv4Packet::from_vec(&out.payload).unwrap();
        assert_eq!(packet.header.time_to_live, DEFAULT_TTL - 1);
        assert_eq!(packet.payload, [1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn uses_route_next_hop() {
        let f = fixture().await;
        f.rib
            .upsert_static(RouteEntry::static_route(
                ip("192.168.0.0"),
                IpV4Mask::new(16).unwrap(),
                Some(ip("10.0.1.254")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(
            f.fwd.on_ipv4_frame(&frame("192.168.3.3", 10), "eth0").await,
            Verdict::Forwarding {
                out_if: "eth1".into(),
                next_hop: ip("10.0.1.254")
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drop_reasons() {
        let f = fixture().await;
        let cases = [
            ("255.255.255.255", 64, "eth0", DropReason::NotUnicast),
            ("224.0.0.9", 64, "eth0", DropReason::NotUnicast),
            ("10.0.0.1", 64, "eth0", DropReason::Local),
            ("10.0.1.9", 1, "eth0", DropReason::TtlExpired),
            ("10.0.1.9", 0, "eth0", DropReason::TtlExpired),
            ("8.8.8.8", 64, "eth0", DropReason::NoRoute),
            ("10.0.0.9", 64, "eth0", DropReason::SameInterface),
            ("10.0.1.9", 64, "eth5", DropReason::UnknownInterface),
        ];
        for (dst, ttl, in_if, reason) in cases {
            assert_eq!(
                f.fwd.on_ipv4_frame(&frame(dst, ttl), in_if).await,
                Verdict::Dropped(reason),
                "{dst} ttl {ttl} on {in_if}"
            );
        }

        let mut garbage = frame("10.0.1.9", 64);
        garbage.payload[10] ^= 0xff;
        assert_eq!(
            f.fwd.on_ipv4_frame(&garbage, "eth0").await,
            Verdict::Dropped(DropReason::Malformed)
        );
        let arp = EthernetPacket::new_arp(mac::BROADCAST, HOST, vec![0; 28]).unwrap();
        assert_eq!(
            f.fwd.on_ipv4_frame(&arp, "eth0").await,
            Verdict::Dropped(DropReason::Malformed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poisoned_route_falls_back_to_covering_route() {
        let f = fixture().await;
        f.rib
            .upsert_rip(RouteEntry::rip(
                ip("192.168.5.0"),
                IpV4Mask::new(24).unwrap(),
                "eth1",
                ip("10.0.1.2"),
                RIP_INFINITY,
                ip("10.0.1.2"),
            ))
            .await
            .unwrap();
        assert_eq!(
            f.fwd.on_ipv4_frame(&frame("192.168.5.1", 64), "eth0").await,
            Verdict::Dropped(DropReason::NoRoute)
        );

        f.rib
            .upsert_static(RouteEntry::static_route(
                ip("192.168.0.0"),
                IpV4Mask::new(16).unwrap(),
                Some(ip("10.0.1.9")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(
            f.fwd.on_ipv4_frame(&frame("192.168.5.1", 64), "eth0").await,
            Verdict::Forwarding {
                out_if: "eth1".into(),
                next_hop: ip("10.0.1.9")
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_next_hop_drops_silently() {
        let f = fixture().await;
        let verdict = f.fwd.on_ipv4_frame(&frame("10.0.1.50", 64), "eth0").await;
        assert!(matches!(verdict, Verdict::Forwarding { .. }));

        tokio::time::sleep(Duration::from_secs(10)).await;
        // Only ARP requests made it onto the wire.
        let sent: Vec<_> = f.eth1.drain().collect();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|fr| fr.get_ether_type() == EtherType::ARP));
    }
}
