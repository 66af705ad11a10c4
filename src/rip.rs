use std::{collections::HashMap, sync::Arc, time::Duration};

use derivative::Derivative;
use thiserror::Error;
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};
use tracing::{debug, info, trace, warn};

use crate::{
    config::RipTimers,
    interfaces::InterfaceRegistry,
    link::tx::FrameTx,
    network::ipv4::addr::{IpV4Addr, IpV4Mask},
    process::{Pid, ProcessManager},
    route::{rib::Rib, RouteEntry, RIP_INFINITY},
};

use self::{
    interface::{HorizonPolicy, RipInterface, TriggerAction},
    packet::{RipCommand, RipPacket, Rte},
};

pub mod interface;
pub mod packet;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RipError {
    #[error("unknown interface {0}")]
    UnknownInterface(String),
    #[error("RIP is not enabled on {0}")]
    NotEnabled(String),
}

/// (network, mask, neighbor) of a learned route.
type AgingKey = (IpV4Addr, IpV4Mask, IpV4Addr);

#[derive(Debug, Clone, Copy)]
struct AgingRecord {
    last_seen: Instant,
    poisoned: bool,
}

#[derive(Debug)]
struct RipPort {
    iface: RipInterface,
    periodic: Pid,
}

/// RIPv2 over every interface it is enabled on.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RipEngine {
    #[derivative(Debug = "ignore")]
    rib: Arc<Rib>,
    #[derivative(Debug = "ignore")]
    interfaces: Arc<InterfaceRegistry>,
    #[derivative(Debug = "ignore")]
    tx: Arc<dyn FrameTx>,
    timers: RipTimers,
    #[derivative(Debug = "ignore")]
    processes: ProcessManager,
    ports: RwLock<HashMap<String, RipPort>>,
    aging: Mutex<HashMap<AgingKey, AgingRecord>>,
}

impl RipEngine {
    pub fn new(
        rib: Arc<Rib>,
        interfaces: Arc<InterfaceRegistry>,
        tx: Arc<dyn FrameTx>,
        timers: RipTimers,
        processes: ProcessManager,
    ) -> Self {
        Self {
            rib,
            interfaces,
            tx,
            timers,
            processes,
            ports: RwLock::new(HashMap::new()),
            aging: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns the aging sweep and the RIB change listener.
    pub async fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.processes
            .add("rip aging", move |_, mut stop| async move {
                let mut interval = tokio::time::interval(this.timers.aging_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = stop.stopped() => break,
                        _ = interval.tick() => this.age_routes_at(Instant::now()).await,
                    }
                }
            })
            .await;

        let this = self.clone();
        let changes = self.rib.subscribe().await;
        self.processes
            .add("rip route listener", move |_, mut stop| async move {
                loop {
                    tokio::select! {
                        _ = stop.stopped() => break,
                        change = changes.recv_async() => {
                            let Ok(change) = change else { break };
                            trace!(?change, "Route change, triggering updates");
                            for name in this.enabled_interfaces().await {
                                this.trigger_update(&name).await;
                            }
                        }
                    }
                }
            })
            .await;
    }

    pub async fn enabled_interfaces(&self) -> Vec<String> {
        let mut names: Vec<_> = self.ports.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_enabled(&self, iface: &str) -> bool {
        self.ports.read().await.contains_key(iface)
    }

    /// Advertises right away and then every update interval. Enabling an
    /// enabled interface only changes its horizon policy.
    pub async fn enable_on_interface(
        self: &Arc<Self>,
        iface: &str,
        policy: HorizonPolicy,
    ) -> Result<(), RipError> {
        let nic = self
            .interfaces
            .get(iface)
            .await
            .ok_or_else(|| RipError::UnknownInterface(iface.to_string()))?;
        {
            let mut ports = self.ports.write().await;
            if let Some(port) = ports.get_mut(iface) {
                port.iface.set_policy(policy);
                return Ok(());
            }

            let this = self.clone();
            let name = iface.to_string();
            let update = self.timers.update;
            let periodic = self
                .processes
                .add(format!("rip periodic {iface}"), move |_, mut stop| async move {
                    let mut interval =
                        tokio::time::interval_at(Instant::now() + update, update);
                    loop {
                        tokio::select! {
                            _ = stop.stopped() => break,
                            _ = interval.tick() => this.advertise(&name).await,
                        }
                    }
                })
                .await;
            ports.insert(
                iface.to_string(),
                RipPort {
                    iface: RipInterface::new(nic, policy),
                    periodic,
                },
            );
        }
        info!(NIC = iface, %policy, "RIP enabled");
        self.advertise(iface).await;
        Ok(())
    }

    /// Sends one update withdrawing everything, then stops RIP on `iface`.
    pub async fn disable_on_interface(&self, iface: &str) -> Result<(), RipError> {
        let port = self
            .ports
            .write()
            .await
            .remove(iface)
            .ok_or_else(|| RipError::NotEnabled(iface.to_string()))?;
        self.processes
            .stop_process(port.periodic, self.timers.trigger_holddown)
            .await;

        let rtes = port.iface.poison_rtes(&self.rib.snapshot().await);
        self.send_rtes(&port.iface, &rtes).await;
        info!(NIC = iface, "RIP disabled");
        Ok(())
    }

    /// Full table out of `iface`, if RIP is still enabled there.
    async fn advertise(&self, iface: &str) {
        let Some(rip_if) = self.ports.read().await.get(iface).map(|p| p.iface.clone()) else {
            return;
        };
        let rtes = rip_if.build_rtes(&self.rib.snapshot().await);
        self.send_rtes(&rip_if, &rtes).await;
    }

    async fn send_rtes(&self, rip_if: &RipInterface, rtes: &[Rte]) {
        for frame in rip_if.frames(rtes) {
            if let Err(e) = self.tx.send(rip_if.name(), frame).await {
                warn!(NIC = rip_if.name(), "RIP update not sent: {e}");
                return;
            }
        }
        trace!(NIC = rip_if.name(), routes = rtes.len(), "RIP update sent");
    }

    /// Sends now, or once the hold-down since the last triggered update has
    /// passed. Triggers arriving meanwhile are folded into that one update.
    pub async fn trigger_update(self: &Arc<Self>, iface: &str) {
        let now = Instant::now();
        let action = match self.ports.write().await.get_mut(iface) {
            Some(port) => port.iface.on_trigger(now, self.timers.trigger_holddown),
            None => return,
        };
        match action {
            TriggerAction::SendNow => self.advertise(iface).await,
            TriggerAction::Defer(wait) => {
                trace!(NIC = iface, ?wait, "Triggered update deferred");
                let this = self.clone();
                let iface = iface.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    let fire = match this.ports.write().await.get_mut(&iface) {
                        Some(port) => port.iface.fire_deferred(Instant::now()),
                        None => false,
                    };
                    if fire {
                        this.advertise(&iface).await;
                    }
                });
            }
            TriggerAction::Coalesced => {}
        }
    }

    /// RIP payload from `src` received on `iface`.
    pub async fn on_rip_packet(self: &Arc<Self>, iface: &str, src: IpV4Addr, payload: &[u8]) {
        let own = match self.ports.read().await.get(iface) {
            Some(port) => port.iface.nic().addr,
            None => {
                trace!(NIC = iface, "RIP packet on an interface without RIP");
                return;
            }
        };
        if src == own {
            return;
        }
        let packet = match RipPacket::from_vec(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(NIC = iface, %src, "RIP packet dropped: {e}");
                return;
            }
        };

        match packet.command {
            RipCommand::Request => {
                debug!(NIC = iface, %src, "RIP request, answering with the full table");
                self.advertise(iface).await;
            }
            RipCommand::Response => {
                let mut changed = false;
                for rte in &packet.rtes {
                    changed |= self.apply_rte(iface, src, rte).await;
                }
                if changed {
                    self.trigger_update(iface).await;
                }
            }
        }
    }

    /// `true` when the RIB changed.
    async fn apply_rte(&self, iface: &str, src: IpV4Addr, rte: &Rte) -> bool {
        let metric = (rte.metric + 1).min(RIP_INFINITY);
        let key = (rte.network, rte.mask, src);

        if metric >= RIP_INFINITY {
            self.aging.lock().await.remove(&key);
            let removed = self.rib.remove_rip(rte.network, rte.mask, Some(src)).await;
            if removed.is_some() {
                debug!(NIC = iface, %src, network = %rte.network, mask = %rte.mask, "RIP route withdrawn");
            }
            return removed.is_some();
        }

        let next_hop = rte.next_hop.unwrap_or(src);
        let route = RouteEntry::rip(rte.network, rte.mask, iface, next_hop, metric, src);
        let current = self.rib.get_rip(rte.network, rte.mask).await;

        let mut aging = self.aging.lock().await;
        if let Some(held) = &current {
            if let Some(holder) = held.learned_from().filter(|n| *n != src) {
                let live = aging
                    .get(&(rte.network, rte.mask, holder))
                    .map_or(false, |r| !r.poisoned);
                if live && held.metric() <= metric {
                    trace!(NIC = iface, %src, %holder, network = %rte.network, "Keeping route from current neighbor");
                    return false;
                }
                aging.remove(&(rte.network, rte.mask, holder));
            }
        }
        aging.insert(
            key,
            AgingRecord {
                last_seen: Instant::now(),
                poisoned: false,
            },
        );
        drop(aging);

        if current.as_ref() == Some(&route) {
            return false;
        }
        match self.rib.upsert_rip(route).await {
            Ok(()) => true,
            Err(e) => {
                warn!(NIC = iface, "RIP route rejected: {e}");
                false
            }
        }
    }

    /// Poisons routes silent for the timeout and removes them once the
    /// garbage collection time has passed as well.
    pub async fn age_routes_at(&self, now: Instant) {
        let timeout = self.timers.timeout;
        let evict_after = timeout + self.timers.garbage_collection;

        let mut evict = Vec::new();
        let mut poison = Vec::new();
        {
            let mut aging = self.aging.lock().await;
            aging.retain(|key, record| {
                let age = now.saturating_duration_since(record.last_seen);
                if age >= evict_after {
                    evict.push(*key);
                    return false;
                }
                if age >= timeout && !record.poisoned {
                    record.poisoned = true;
                    poison.push(*key);
                }
                true
            });
        }

        for (network, mask, neighbor) in evict {
            if let Some(route) = self.rib.remove_rip(network, mask, Some(neighbor)).await {
                info!(%route, "RIP route expired");
            }
        }
        for (network, mask, neighbor) in poison {
            let Some(route) = self
                .rib
                .get_rip(network, mask)
                .await
                .filter(|r| r.learned_from() == Some(neighbor))
            else {
                continue;
            };
            info!(%route, "RIP route timed out, poisoning");
            if let Err(e) = self.rib.upsert_rip(route.with_metric(RIP_INFINITY)).await {
                warn!("Could not poison route: {e}");
            }
        }
    }

    /// Routes still tracked for aging, with the time since they were last
    /// heard.
    pub async fn aging_records(&self) -> Vec<(IpV4Addr, IpV4Mask, IpV4Addr, Duration)> {
        let now = Instant::now();
        let mut list: Vec<_> = self
            .aging
            .lock()
            .await
            .iter()
            .map(|((net, mask, neighbor), r)| {
                (*net, *mask, *neighbor, now.saturating_duration_since(r.last_seen))
            })
            .collect();
        list.sort_by_key(|(net, mask, neighbor, _)| (*net, *mask, *neighbor));
        list
    }
}
