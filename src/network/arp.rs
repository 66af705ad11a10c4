use std::{sync::Arc, time::Duration};

use derivative::Derivative;
use flume::{Receiver, Sender};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    config::ArpTimers,
    interfaces::InterfaceRegistry,
    link::{
        ethernet::{ethertype::EtherType, packet::EthernetPacket},
        tx::FrameTx,
    },
    mac::Mac,
    route::rib::Rib,
};

use self::{
    cache::{ArpCache, ArpState},
    packet::{ArpPacket, Operation},
    proxy::ProxyArpConfig,
    scheduler::{ArpRequestScheduler, ResolveError},
};

use super::ipv4::addr::IpV4Addr;

pub mod cache;
pub mod packet;
pub mod proxy;
pub mod scheduler;

/// A sender observed in an accepted ARP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpSeen {
    pub iface: String,
    pub ip: IpV4Addr,
    pub mac: Mac,
}

/// Handles incoming ARP, answers for our own and proxied addresses and
/// resolves next hops for the rest of the router.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ArpEngine {
    #[derivative(Debug = "ignore")]
    interfaces: Arc<InterfaceRegistry>,
    #[derivative(Debug = "ignore")]
    rib: Arc<Rib>,
    cache: Arc<ArpCache>,
    scheduler: Arc<ArpRequestScheduler>,
    proxy: ProxyArpConfig,
    #[derivative(Debug = "ignore")]
    tx: Arc<dyn FrameTx>,
    #[derivative(Debug = "ignore")]
    observers: Mutex<Vec<Sender<ArpSeen>>>,
}

impl ArpEngine {
    pub fn new(
        interfaces: Arc<InterfaceRegistry>,
        rib: Arc<Rib>,
        tx: Arc<dyn FrameTx>,
        timers: ArpTimers,
        proxy: ProxyArpConfig,
    ) -> Self {
        let scheduler = Arc::new(ArpRequestScheduler::new(
            interfaces.clone(),
            tx.clone(),
            timers.retry_delays.clone(),
        ));
        Self {
            interfaces,
            rib,
            cache: Arc::new(ArpCache::new(timers)),
            scheduler,
            proxy,
            tx,
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ArpCache> {
        &self.cache
    }

    pub fn proxy(&self) -> &ProxyArpConfig {
        &self.proxy
    }

    pub async fn subscribe(&self) -> Receiver<ArpSeen> {
        let (tx, rx) = flume::unbounded();
        self.observers.lock().await.push(tx);
        rx
    }

    async fn publish(&self, seen: ArpSeen) {
        self.observers
            .lock()
            .await
            .retain(|tx| tx.send(seen.clone()).is_ok());
    }

    pub async fn on_ethernet_frame(&self, frame: &EthernetPacket, iface: &str) {
        if frame.get_ether_type() != EtherType::ARP {
            return;
        }
        let Some(arp) = ArpPacket::from_vec(&frame.payload) else {
            debug!(NIC = iface, "Malformed ARP packet dropped");
            return;
        };
        let Some(nic) = self.interfaces.get(iface).await else {
            warn!(NIC = iface, "ARP received on unknown interface");
            return;
        };
        if arp.sender_mac == nic.mac || arp.sender_ip == nic.addr {
            return;
        }
        trace!(NIC = iface, ?arp, "ARP received");

        self.publish(ArpSeen {
            iface: iface.to_string(),
            ip: arp.sender_ip,
            mac: arp.sender_mac,
        })
        .await;

        let we_wait_for_spa = self
            .cache
            .get(arp.sender_ip)
            .await
            .map_or(false, |e| e.state == ArpState::Incomplete);
        let asked_us = arp.operation == Operation::Request && arp.target_ip == nic.addr;

        if we_wait_for_spa || asked_us {
            self.cache.learned(arp.sender_ip, arp.sender_mac).await;
            self.scheduler
                .on_learned(iface, arp.sender_ip, arp.sender_mac)
                .await;
        }

        if arp.operation != Operation::Request {
            return;
        }
        if asked_us {
            self.reply(iface, nic.mac, nic.addr, &arp).await;
        } else if self.should_proxy_for(iface, arp.target_ip).await {
            debug!(NIC = iface, target = %arp.target_ip, "Answering proxy ARP");
            self.reply(iface, nic.mac, arp.target_ip, &arp).await;
            self.cache.learned(arp.target_ip, nic.mac).await;
        }
    }

    async fn reply(&self, iface: &str, our_mac: Mac, answer_for: IpV4Addr, request: &ArpPacket) {
        let reply = ArpPacket::new_reply(our_mac, answer_for, request.sender_mac, request.sender_ip);
        let Some(frame) = reply.into_frame() else {
            return;
        };
        if let Err(e) = self.tx.send(iface, frame).await {
            warn!(NIC = iface, "ARP reply not sent: {e}");
        }
    }

    pub async fn should_proxy_for(&self, in_if: &str, target: IpV4Addr) -> bool {
        if !self.proxy.read().await.allows(in_if) || !target.is_unicast() {
            return false;
        }
        match self.interfaces.get(in_if).await {
            Some(nic) if nic.addr != target => {}
            _ => return false,
        }
        self.rib
            .lookup(target)
            .await
            .and_then(|r| r.out_if().map(|out| out != in_if))
            .unwrap_or(false)
    }

    /// Entries pointing at one of our own MACs (proxy seeds) do not count as
    /// resolved.
    pub async fn resolve(&self, iface: &str, target: IpV4Addr) -> Result<Mac, ResolveError> {
        if self.interfaces.get(iface).await.is_none() {
            return Err(ResolveError::UnknownInterface(iface.to_string()));
        }
        if let Some(mac) = self.cache.get(target).await.filter(|e| e.is_usable()).and_then(|e| e.mac) {
            if !self.interfaces.is_own_mac(mac).await {
                return Ok(mac);
            }
        }

        self.cache.begin_resolve(target).await;
        let result = self.scheduler.kick(iface, target).await.await;
        match result {
            Ok(mac) => self.cache.learned(target, mac).await,
            Err(_) => self.cache.mark_failed(target).await,
        }
        result
    }

    pub async fn resolve_timeout(
        &self,
        iface: &str,
        target: IpV4Addr,
        timeout: Duration,
    ) -> Result<Mac, ResolveError> {
        tokio::time::timeout(timeout, self.resolve(iface, target))
            .await
            .unwrap_or(Err(ResolveError::Timeout))
    }
}
