use std::{fmt::Display, time::Duration};

use tokio::time::Instant;

use super::packet::{RipPacket, Rte, RIP_PORT};
use crate::{
    interfaces::Interface,
    link::ethernet::packet::EthernetPacket,
    mac,
    network::ipv4::addr,
    route::{Proto, RouteEntry, RIP_INFINITY},
    transport::udp::{build_frame, UdpEndpoints},
};

/// How routes learned on an interface are advertised back out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HorizonPolicy {
    /// Left out of the update.
    SplitHorizon,
    /// Sent at metric 16.
    #[default]
    PoisonReverse,
}

impl Display for HorizonPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SplitHorizon => "split-horizon",
            Self::PoisonReverse => "poison-reverse",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    SendNow,
    /// Hold-down still running, send once it has passed.
    Defer(Duration),
    /// A deferred update is already queued.
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct RipInterface {
    nic: Interface,
    policy: HorizonPolicy,
    last_triggered: Option<Instant>,
    deferred: bool,
}

impl RipInterface {
    pub fn new(nic: Interface, policy: HorizonPolicy) -> Self {
        Self {
            nic,
            policy,
            last_triggered: None,
            deferred: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.nic.name
    }

    pub fn nic(&self) -> &Interface {
        &self.nic
    }

    pub fn policy(&self) -> HorizonPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: HorizonPolicy) {
        self.policy = policy;
    }

    fn learned_here(&self, route: &RouteEntry) -> bool {
        route.proto() == Proto::Rip && route.out_if() == Some(self.name())
    }

    /// The full table as advertised out of this interface.
    pub fn build_rtes(&self, routes: &[RouteEntry]) -> Vec<Rte> {
        routes
            .iter()
            .filter_map(|route| {
                let mut rte = self.export(route);
                if self.learned_here(route) {
                    match self.policy {
                        HorizonPolicy::SplitHorizon => return None,
                        HorizonPolicy::PoisonReverse => rte.metric = RIP_INFINITY,
                    }
                }
                Some(rte)
            })
            .collect()
    }

    /// Every route this interface would export, withdrawn.
    pub fn poison_rtes(&self, routes: &[RouteEntry]) -> Vec<Rte> {
        self.build_rtes(routes)
            .into_iter()
            .map(|rte| Rte {
                metric: RIP_INFINITY,
                ..rte
            })
            .collect()
    }

    fn export(&self, route: &RouteEntry) -> Rte {
        let mut rte = Rte::from_route(route);
        rte.next_hop = rte.next_hop.filter(|hop| self.nic.contains(*hop));
        rte
    }

    pub fn frames(&self, rtes: &[Rte]) -> Vec<EthernetPacket> {
        RipPacket::responses(rtes)
            .into_iter()
            .filter_map(|packet| {
                build_frame(
                    UdpEndpoints {
                        src_mac: self.nic.mac,
                        dst_mac: mac::RIP_MULTICAST,
                        src_ip: self.nic.addr,
                        dst_ip: addr::RIP_MULTICAST,
                        src_port: RIP_PORT,
                        dst_port: RIP_PORT,
                        ttl: 1,
                    },
                    packet.to_vec(),
                )
            })
            .collect()
    }

    /// Rate limits triggered updates to one per `holddown`.
    pub fn on_trigger(&mut self, now: Instant, holddown: Duration) -> TriggerAction {
        if self.deferred {
            return TriggerAction::Coalesced;
        }
        match self.last_triggered {
            Some(last) if now.saturating_duration_since(last) < holddown => {
                self.deferred = true;
                TriggerAction::Defer(holddown - now.saturating_duration_since(last))
            }
            _ => {
                self.last_triggered = Some(now);
                TriggerAction::SendNow
            }
        }
    }

    /// `true` when a deferred update was pending and should go out now.
    pub fn fire_deferred(&mut self, now: Instant) -> bool {
        if !self.deferred {
            return false;
        }
        self.deferred = false;
        self.last_triggered = Some(now);
        true
    }
}
