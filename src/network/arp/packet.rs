use crate::{
    link::ethernet::{ethertype::EtherType, packet::EthernetPacket},
    mac::{self, Mac},
    network::ipv4::addr::IpV4Addr,
};

const HTYPE_ETHERNET: u16 = 1;
const HLEN: u8 = 6;
const PLEN: u8 = 4;
const PACKET_LEN: usize = 8 + 2 * HLEN as usize + 2 * PLEN as usize;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    Request = 1,
    Reply = 2,
}

impl Operation {
    const fn from_u16(b: u16) -> Option<Self> {
        match b {
            1 => Some(Self::Request),
            2 => Some(Self::Reply),
            _ => None,
        }
    }
}

/// ARP for IPv4 over Ethernet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: Operation,
    pub sender_mac: Mac,
    pub sender_ip: IpV4Addr,
    pub target_mac: Mac,
    pub target_ip: IpV4Addr,
}

impl ArpPacket {
    /// Target hardware address is left all-zero.
    pub fn new_request(sha: Mac, spa: IpV4Addr, tpa: IpV4Addr) -> Self {
        Self {
            operation: Operation::Request,
            sender_mac: sha,
            sender_ip: spa,
            target_mac: mac::ZERO,
            target_ip: tpa,
        }
    }

    pub fn new_reply(sha: Mac, spa: IpV4Addr, tha: Mac, tpa: IpV4Addr) -> Self {
        Self {
            operation: Operation::Reply,
            sender_mac: sha,
            sender_ip: spa,
            target_mac: tha,
            target_ip: tpa,
        }
    }

    /// Trailing bytes (Ethernet padding) are ignored.
    pub fn from_vec(data: &[u8]) -> Option<Self> {
        if data.len() < PACKET_LEN {
            return None;
        }
        let htype = u16::from_be_bytes(data[0..2].try_into().ok()?);
        let ptype = EtherType::from_u16(u16::from_be_bytes(data[2..4].try_into().ok()?));
        if htype != HTYPE_ETHERNET || ptype != EtherType::IP_V4 || data[4] != HLEN || data[5] != PLEN
        {
            return None;
        }
        let operation = Operation::from_u16(u16::from_be_bytes(data[6..8].try_into().ok()?))?;
        Some(Self {
            operation,
            sender_mac: Mac::from_slice(&data[8..14])?,
            sender_ip: IpV4Addr::from_slice(&data[14..18])?,
            target_mac: Mac::from_slice(&data[18..24])?,
            target_ip: IpV4Addr::from_slice(&data[24..28])?,
        })
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(PACKET_LEN);
        vec.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        vec.extend_from_slice(&EtherType::IP_V4.to_u16().to_be_bytes());
        vec.push(HLEN);
        vec.push(PLEN);
        vec.extend_from_slice(&(self.operation as u16).to_be_bytes());
        vec.extend_from_slice(self.sender_mac.as_slice());
        vec.extend_from_slice(&self.sender_ip.as_arr());
        vec.extend_from_slice(self.target_mac.as_slice());
        vec.extend_from_slice(&self.target_ip.as_arr());
        vec
    }

    /// Requests go to broadcast, replies straight back to the asker.
    pub fn into_frame(self) -> Option<EthernetPacket> {
        let dest = match self.operation {
            Operation::Request => mac::BROADCAST,
            Operation::Reply => self.target_mac,
        };
        EthernetPacket::new_arp(dest, self.sender_mac, self.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format() {
        let sha = Mac::new([2, 0, 0, 0, 0, 1]);
        let req = ArpPacket::new_request(
            sha,
            IpV4Addr::new([10, 0, 0, 1]),
            IpV4Addr::new([10, 0, 0, 2]),
        );
        let bytes = req.to_vec();
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[0..8], &[0, 1, 8, 0, 6, 4, 0, 1]);
        assert_eq!(&bytes[18..24], &[0; 6]);

        let frame = req.clone().into_frame().unwrap();
        assert!(frame.get_dest().is_broadcast());
        assert_eq!(frame.get_ether_type(), EtherType::ARP);

        let mut padded = bytes.clone();
        padded.resize(46, 0);
        assert_eq!(ArpPacket::from_vec(&padded), Some(req));
    }

    #[test]
    fn rejects_foreign_hardware() {
        let mut bytes = ArpPacket::new_reply(
            mac::ZERO,
            IpV4Addr::new([1, 1, 1, 1]),
            mac::ZERO,
            IpV4Addr::new([2, 2, 2, 2]),
        )
        .to_vec();
        bytes[1] = 6;
        assert!(ArpPacket::from_vec(&bytes).is_none());
        assert!(ArpPacket::from_vec(&bytes[..20]).is_none());
    }
}
