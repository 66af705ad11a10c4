use std::fmt::Display;

use thiserror::Error;

use crate::network::ipv4::addr::{IpV4Addr, IpV4Mask};

pub mod rib;

pub const RIP_INFINITY: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("route is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("expected a RIP route (AD 120), got {0:?} with AD {1}")]
    NotRip(Proto, AdminDistance),
    #[error("no connected route covers next hop {0}")]
    UnresolvableNextHop(IpV4Addr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Proto {
    Connected,
    Static,
    Rip,
}

impl Proto {
    pub const fn default_distance(self) -> AdminDistance {
        match self {
            Self::Connected => AdminDistance::CONNECTED,
            Self::Static => AdminDistance::STATIC,
            Self::Rip => AdminDistance::RIP,
        }
    }
}

impl Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Static => "static",
            Self::Rip => "rip",
        })
    }
}

/// Source preference, lower wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdminDistance(pub u8);

impl AdminDistance {
    pub const CONNECTED: Self = Self(0);
    pub const STATIC: Self = Self(1);
    pub const RIP: Self = Self(120);
}

impl Display for AdminDistance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a route inside one RIB table. Longer prefixes sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub network: IpV4Addr,
    pub mask: IpV4Mask,
}

impl RouteKey {
    pub fn new(network: IpV4Addr, mask: IpV4Mask) -> Self {
        Self {
            network: network.network(mask),
            mask,
        }
    }
}

impl Ord for RouteKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .mask
            .cmp(&self.mask)
            .then(self.network.cmp(&other.network))
    }
}

impl PartialOrd for RouteKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An immutable route. Use [`RouteEntry::builder`] or one of the per-protocol
/// constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteEntry {
    network: IpV4Addr,
    mask: IpV4Mask,
    out_if: Option<String>,
    next_hop: Option<IpV4Addr>,
    metric: u32,
    distance: AdminDistance,
    proto: Proto,
    learned_from: Option<IpV4Addr>,
}

impl RouteEntry {
    pub fn builder() -> RouteEntryBuilder {
        RouteEntryBuilder::default()
    }

    pub fn connected(network: IpV4Addr, mask: IpV4Mask, iface: impl Into<String>) -> Self {
        Self {
            network: network.network(mask),
            mask,
            out_if: Some(iface.into()),
            next_hop: None,
            metric: 0,
            distance: AdminDistance::CONNECTED,
            proto: Proto::Connected,
            learned_from: None,
        }
    }

    pub fn static_route(
        network: IpV4Addr,
        mask: IpV4Mask,
        next_hop: Option<IpV4Addr>,
        out_if: Option<String>,
    ) -> Self {
        Self {
            network: network.network(mask),
            mask,
            out_if,
            next_hop,
            metric: 1,
            distance: AdminDistance::STATIC,
            proto: Proto::Static,
            learned_from: None,
        }
    }

    pub fn rip(
        network: IpV4Addr,
        mask: IpV4Mask,
        iface: impl Into<String>,
        next_hop: IpV4Addr,
        metric: u32,
        learned_from: IpV4Addr,
    ) -> Self {
        Self {
            network: network.network(mask),
            mask,
            out_if: Some(iface.into()),
            next_hop: Some(next_hop),
            metric,
            distance: AdminDistance::RIP,
            proto: Proto::Rip,
            learned_from: Some(learned_from),
        }
    }

    pub const fn network(&self) -> IpV4Addr {
        self.network
    }

    pub const fn mask(&self) -> IpV4Mask {
        self.mask
    }

    pub fn key(&self) -> RouteKey {
        RouteKey::new(self.network, self.mask)
    }

    pub fn out_if(&self) -> Option<&str> {
        self.out_if.as_deref()
    }

    pub const fn next_hop(&self) -> Option<IpV4Addr> {
        self.next_hop
    }

    pub const fn metric(&self) -> u32 {
        self.metric
    }

    pub const fn distance(&self) -> AdminDistance {
        self.distance
    }

    pub const fn proto(&self) -> Proto {
        self.proto
    }

    pub const fn learned_from(&self) -> Option<IpV4Addr> {
        self.learned_from
    }

    pub fn contains(&self, addr: IpV4Addr) -> bool {
        addr.in_subnet(self.network, self.mask)
    }

    pub fn with_metric(&self, metric: u32) -> Self {
        Self {
            metric,
            ..self.clone()
        }
    }

    pub fn with_out_if(&self, out_if: impl Into<String>) -> Self {
        Self {
            out_if: Some(out_if.into()),
            ..self.clone()
        }
    }
}

impl Display for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}{}", self.proto, self.network, self.mask)?;
        if let Some(nh) = self.next_hop {
            write!(f, " via {nh}")?;
        }
        if let Some(out_if) = &self.out_if {
            write!(f, " dev {out_if}")?;
        }
        write!(f, " [{}/{}]", self.distance, self.metric)
    }
}

#[derive(Debug, Default, Clone)]
pub struct RouteEntryBuilder {
    network: Option<IpV4Addr>,
    mask: Option<IpV4Mask>,
    out_if: Option<String>,
    next_hop: Option<IpV4Addr>,
    metric: u32,
    distance: Option<AdminDistance>,
    proto: Option<Proto>,
    learned_from: Option<IpV4Addr>,
}

impl RouteEntryBuilder {
    pub fn network(mut self, network: IpV4Addr) -> Self {
        self.network = Some(network);
        self
    }

    pub fn mask(mut self, mask: IpV4Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn out_if(mut self, out_if: impl Into<String>) -> Self {
        self.out_if = Some(out_if.into());
        self
    }

    pub fn next_hop(mut self, next_hop: IpV4Addr) -> Self {
        self.next_hop = Some(next_hop);
        self
    }

    pub fn metric(mut self, metric: u32) -> Self {
        self.metric = metric;
        self
    }

    pub fn distance(mut self, distance: AdminDistance) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn proto(mut self, proto: Proto) -> Self {
        self.proto = Some(proto);
        self
    }

    pub fn learned_from(mut self, neighbor: IpV4Addr) -> Self {
        self.learned_from = Some(neighbor);
        self
    }

    pub fn build(self) -> Result<RouteEntry, RouteError> {
        let network = self.network.ok_or(RouteError::MissingField("network"))?;
        let mask = self.mask.ok_or(RouteError::MissingField("mask"))?;
        let proto = self.proto.ok_or(RouteError::MissingField("proto"))?;
        let distance = self.distance.ok_or(RouteError::MissingField("distance"))?;
        Ok(RouteEntry {
            network: network.network(mask),
            mask,
            out_if: self.out_if,
            next_hop: self.next_hop,
            metric: self.metric,
            distance,
            proto,
            learned_from: self.learned_from,
        })
    }
}

/// Published by the RIB after every mutation that changed a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteChange {
    pub added_or_updated: Vec<RouteEntry>,
    pub removed: Vec<RouteEntry>,
}

impl RouteChange {
    pub fn is_empty(&self) -> bool {
        self.added_or_updated.is_empty() && self.removed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.added_or_updated.iter().chain(self.removed.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpV4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn builder_normalizes_and_validates() {
        let r = RouteEntry::builder()
            .network(ip("10.1.2.3"))
            .mask(IpV4Mask::new(16).unwrap())
            .proto(Proto::Static)
            .distance(Proto::Static.default_distance())
            .next_hop(ip("10.0.0.254"))
            .build()
            .unwrap();
        assert_eq!(r.network(), ip("10.1.0.0"));
        assert_eq!(r.distance(), AdminDistance::STATIC);

        assert_eq!(
            RouteEntry::builder()
                .mask(IpV4Mask::new(8).unwrap())
                .build(),
            Err(RouteError::MissingField("network"))
        );
        assert_eq!(
            RouteEntry::builder()
                .network(ip("10.0.0.0"))
                .mask(IpV4Mask::new(8).unwrap())
                .proto(Proto::Rip)
                .build(),
            Err(RouteError::MissingField("distance"))
        );
    }

    #[test]
    fn key_order_prefers_longer_prefixes() {
        let mut keys = vec![
            RouteKey::new(ip("10.0.0.0"), IpV4Mask::new(8).unwrap()),
            RouteKey::new(ip("0.0.0.0"), IpV4Mask::ANY),
            RouteKey::new(ip("10.1.0.0"), IpV4Mask::new(16).unwrap()),
            RouteKey::new(ip("9.0.0.0"), IpV4Mask::new(8).unwrap()),
        ];
        keys.sort();
        let lens: Vec<_> = keys.iter().map(|k| (k.network, k.mask.len())).collect();
        assert_eq!(
            lens,
            [
                (ip("10.1.0.0"), 16),
                (ip("9.0.0.0"), 8),
                (ip("10.0.0.0"), 8),
                (ip("0.0.0.0"), 0)
            ]
        );
    }

    #[test]
    fn display() {
        let r = RouteEntry::rip(
            ip("192.168.5.0"),
            IpV4Mask::new(24).unwrap(),
            "eth0",
            ip("10.0.0.2"),
            2,
            ip("10.0.0.2"),
        );
        assert_eq!(
            r.to_string(),
            "rip 192.168.5.0/24 via 10.0.0.2 dev eth0 [120/2]"
        );
    }
}
