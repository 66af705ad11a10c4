use thiserror::Error;
use tracing::debug;

use crate::{
    network::ipv4::addr::{self, IpV4Addr, IpV4Mask},
    route::{RouteEntry, RIP_INFINITY},
};

pub const RIP_PORT: u16 = 520;
pub const RIP_VERSION: u8 = 2;
pub const MAX_RTES: usize = 25;

const HEADER_LEN: usize = 4;
const RTE_LEN: usize = 20;
const AFI_INET: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RipParseError {
    #[error("RIP packet shorter than its header ({0} bytes)")]
    TooShort(usize),
    #[error("unknown RIP command {0}")]
    UnknownCommand(u8),
    #[error("unsupported RIP version {0}")]
    UnsupportedVersion(u8),
    #[error("{0} trailing bytes after the last RTE")]
    Truncated(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RipCommand {
    Request = 1,
    Response = 2,
}

impl TryFrom<u8> for RipCommand {
    type Error = RipParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            x => Err(RipParseError::UnknownCommand(x)),
        }
    }
}

/// One route table entry. A missing next hop means "via the sender".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rte {
    pub tag: u16,
    pub network: IpV4Addr,
    pub mask: IpV4Mask,
    pub next_hop: Option<IpV4Addr>,
    pub metric: u32,
}

impl Rte {
    /// Metric clamped to 1..=16.
    pub fn from_route(route: &RouteEntry) -> Self {
        Self {
            tag: 0,
            network: route.network(),
            mask: route.mask(),
            next_hop: route.next_hop(),
            metric: route.metric().clamp(1, RIP_INFINITY),
        }
    }

    fn parse(data: &[u8]) -> Option<Self> {
        let afi = u16::from_be_bytes([data[0], data[1]]);
        if afi != AFI_INET {
            debug!(afi, "RTE with foreign address family discarded");
            return None;
        }
        let mask = IpV4Mask::from_addr(IpV4Addr::from_slice(&data[8..12])?)
            .map_err(|e| debug!("RTE discarded: {e}"))
            .ok()?;
        let metric = u32::from_be_bytes(data[16..20].try_into().ok()?);
        if !(1..=RIP_INFINITY).contains(&metric) {
            debug!(metric, "RTE with out of range metric discarded");
            return None;
        }
        let next_hop = IpV4Addr::from_slice(&data[12..16])?;
        Some(Self {
            tag: u16::from_be_bytes([data[2], data[3]]),
            network: IpV4Addr::from_slice(&data[4..8])?.network(mask),
            mask,
            next_hop: (!next_hop.is_unspecified()).then_some(next_hop),
            metric,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&AFI_INET.to_be_bytes());
        out.extend_from_slice(&self.tag.to_be_bytes());
        out.extend_from_slice(&self.network.as_arr());
        out.extend_from_slice(&self.mask.to_addr().as_arr());
        out.extend_from_slice(&self.next_hop.unwrap_or(addr::DEFAULT).as_arr());
        out.extend_from_slice(&self.metric.to_be_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipPacket {
    pub command: RipCommand,
    pub rtes: Vec<Rte>,
}

impl RipPacket {
    pub fn request() -> Self {
        Self {
            command: RipCommand::Request,
            rtes: Vec::new(),
        }
    }

    /// Splits `rtes` into as many responses as needed.
    pub fn responses(rtes: &[Rte]) -> Vec<Self> {
        rtes.chunks(MAX_RTES)
            .map(|chunk| Self {
                command: RipCommand::Response,
                rtes: chunk.to_vec(),
            })
            .collect()
    }

    /// Invalid RTEs are skipped; only header damage fails the packet.
    pub fn from_vec(data: &[u8]) -> Result<Self, RipParseError> {
        if data.len() < HEADER_LEN {
            return Err(RipParseError::TooShort(data.len()));
        }
        let command = RipCommand::try_from(data[0])?;
        if data[1] != RIP_VERSION {
            return Err(RipParseError::UnsupportedVersion(data[1]));
        }
        let body = &data[HEADER_LEN..];
        if body.len() % RTE_LEN != 0 {
            return Err(RipParseError::Truncated(body.len() % RTE_LEN));
        }
        Ok(Self {
            command,
            rtes: body.chunks_exact(RTE_LEN).filter_map(Rte::parse).collect(),
        })
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(HEADER_LEN + RTE_LEN * self.rtes.len());
        vec.extend_from_slice(&[self.command as u8, RIP_VERSION, 0, 0]);
        for rte in &self.rtes {
            rte.write(&mut vec);
        }
        vec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpV4Addr {
        s.parse().unwrap()
    }

    fn m(len: u8) -> IpV4Mask {
        IpV4Mask::new(len).unwrap()
    }

    fn raw_rte(afi: u16, net: [u8; 4], mask: [u8; 4], next_hop: [u8; 4], metric: u32) -> Vec<u8> {
        let mut v = afi.to_be_bytes().to_vec();
        v.extend_from_slice(&[0, 0]);
        v.extend_from_slice(&net);
        v.extend_from_slice(&mask);
        v.extend_from_slice(&next_hop);
        v.extend_from_slice(&metric.to_be_bytes());
        v
    }

    #[test]
    fn routes_survive_encoding() {
        let routes = [
            RouteEntry::connected(ip("10.0.0.0"), m(24), "eth0"),
            RouteEntry::static_route(ip("172.16.0.0"), m(12), Some(ip("10.0.0.254")), Some("eth0".into())),
            RouteEntry::rip(ip("192.168.5.0"), m(24), "eth1", ip("10.0.1.2"), 16, ip("10.0.1.2")),
            RouteEntry::connected(ip("0.0.0.0"), m(0), "eth2").with_metric(40),
        ];
        let rtes: Vec<_> = routes.iter().map(Rte::from_route).collect();
        let bytes = RipPacket::responses(&rtes)[0].to_vec();
        let parsed = RipPacket::from_vec(&bytes).unwrap();
        assert_eq!(parsed.command, RipCommand::Response);

        let got: Vec<_> = parsed
            .rtes
            .iter()
            .map(|r| (r.network, r.mask, r.next_hop, r.metric))
            .collect();
        let want: Vec<_> = routes
            .iter()
            .map(|r| (r.network(), r.mask(), r.next_hop(), r.metric().clamp(1, 16)))
            .collect();
        assert_eq!(got, want);
        // Connected routes carry metric 0 and go out as 1.
        assert_eq!(got[0].3, 1);
    }

    #[test]
    fn responses_hold_at_most_25_rtes() {
        let rte = Rte {
            tag: 0,
            network: ip("10.0.0.0"),
            mask: m(8),
            next_hop: None,
            metric: 1,
        };
        let sizes: Vec<_> = RipPacket::responses(&vec![rte; 60])
            .iter()
            .map(|p| p.rtes.len())
            .collect();
        assert_eq!(sizes, [25, 25, 10]);
        assert!(RipPacket::responses(&[]).is_empty());
    }

    #[test]
    fn invalid_rtes_are_discarded() {
        let mut data = vec![2, 2, 0, 0];
        data.extend(raw_rte(2, [10, 1, 0, 0], [255, 255, 0, 0], [0; 4], 3));
        data.extend(raw_rte(0, [10, 2, 0, 0], [255, 255, 0, 0], [0; 4], 3));
        data.extend(raw_rte(2, [10, 3, 0, 0], [255, 0, 255, 0], [0; 4], 3));
        data.extend(raw_rte(2, [10, 4, 0, 0], [255, 255, 0, 0], [0; 4], 0));
        data.extend(raw_rte(2, [10, 5, 0, 0], [255, 255, 0, 0], [0; 4], 17));
        data.extend(raw_rte(2, [10, 6, 0, 9], [255, 255, 0, 0], [10, 0, 0, 2], 16));

        let p = RipPacket::from_vec(&data).unwrap();
        assert_eq!(p.rtes.len(), 2);
        assert_eq!(p.rtes[0].network, ip("10.1.0.0"));
        assert_eq!(p.rtes[0].next_hop, None);
        assert_eq!(p.rtes[1].network, ip("10.6.0.0"));
        assert_eq!(p.rtes[1].next_hop, Some(ip("10.0.0.2")));
        assert_eq!(p.rtes[1].metric, 16);
    }

    #[test]
    fn header_errors() {
        assert_eq!(RipPacket::from_vec(&[2, 2]), Err(RipParseError::TooShort(2)));
        assert_eq!(
            RipPacket::from_vec(&[9, 2, 0, 0]),
            Err(RipParseError::UnknownCommand(9))
        );
        assert_eq!(
            RipPacket::from_vec(&[2, 1, 0, 0]),
            Err(RipParseError::UnsupportedVersion(1))
        );
        assert_eq!(
            RipPacket::from_vec(&[2, 2, 0, 0, 0, 2, 0]),
            Err(RipParseError::Truncated(3))
        );
        assert_eq!(
            RipPacket::from_vec(&RipPacket::request().to_vec()),
            Ok(RipPacket::request())
        );
    }
}
