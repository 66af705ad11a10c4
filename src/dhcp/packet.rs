use std::time::Duration;

use crate::{
    mac::Mac,
    network::ipv4::addr::{IpV4Addr, IpV4Mask},
};

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

const BOOTP_HEADER_LEN: usize = 236;
const MAGIC_COOKIE: u32 = 0x6382_5363;
const MIN_LEN: usize = BOOTP_HEADER_LEN + 4;

const OP_REPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;

pub mod option {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const END: u8 = 255;
}

bitflags::bitflags! {
    pub struct DhcpFlags: u16 {
        /// Client cannot receive unicast before configuration.
        const BROADCAST = 0x8000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Request,
    Release,
    Other,
}

impl DhcpMessageType {
    const fn from_u8(b: u8) -> Self {
        match b {
            1 => Self::Discover,
            3 => Self::Request,
            7 => Self::Release,
            _ => Self::Other,
        }
    }
}

/// The parts of a client message the server acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub kind: DhcpMessageType,
    pub xid: u32,
    pub chaddr: Option<Mac>,
    pub requested_ip: Option<IpV4Addr>,
}

/// Walks the TLV options after the cookie, stopping at END or at the first
/// truncated option.
pub fn options(data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut i = MIN_LEN;
    std::iter::from_fn(move || loop {
        let code = *data.get(i)?;
        match code {
            option::END => return None,
            option::PAD => i += 1,
            _ => {
                let len = *data.get(i + 1)? as usize;
                let value = data.get(i + 2..i + 2 + len)?;
                i += 2 + len;
                return Some((code, value));
            }
        }
    })
}

impl DhcpMessage {
    /// Never fails: anything too short or without the magic cookie is
    /// `Other`.
    pub fn parse(data: &[u8]) -> Self {
        let xid = data
            .get(4..8)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_be_bytes)
            .unwrap_or(0);
        let chaddr = data.get(28..34).and_then(Mac::from_slice);
        let mut msg = Self {
            kind: DhcpMessageType::Other,
            xid,
            chaddr,
            requested_ip: None,
        };

        let cookie = data
            .get(BOOTP_HEADER_LEN..MIN_LEN)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_be_bytes);
        if cookie != Some(MAGIC_COOKIE) {
            return msg;
        }

        for (code, value) in options(data) {
            match (code, value) {
                (option::MESSAGE_TYPE, [t]) => msg.kind = DhcpMessageType::from_u8(*t),
                (option::REQUESTED_IP, ip) if ip.len() == 4 => {
                    msg.requested_ip = IpV4Addr::from_slice(ip)
                }
                _ => {}
            }
        }
        msg
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Offer = 2,
    Ack = 5,
}

/// An OFFER or ACK. `server_id` doubles as siaddr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpReply {
    pub kind: ReplyKind,
    pub xid: u32,
    pub client_mac: Mac,
    pub yiaddr: IpV4Addr,
    pub server_id: IpV4Addr,
    pub mask: IpV4Mask,
    pub gateway: IpV4Addr,
    pub lease: Duration,
}

impl DhcpReply {
    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(300);
        vec.extend_from_slice(&[OP_REPLY, HTYPE_ETHERNET, 6, 0]);
        vec.extend_from_slice(&self.xid.to_be_bytes());
        vec.extend_from_slice(&0u16.to_be_bytes()); // secs
        vec.extend_from_slice(&DhcpFlags::BROADCAST.bits().to_be_bytes());
        vec.extend_from_slice(&[0; 4]); // ciaddr
        vec.extend_from_slice(&self.yiaddr.as_arr());
        vec.extend_from_slice(&self.server_id.as_arr());
        vec.extend_from_slice(&[0; 4]); // giaddr
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(self.client_mac.as_slice());
        vec.extend_from_slice(&chaddr);
        vec.resize(BOOTP_HEADER_LEN, 0); // sname, file
        vec.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());

        vec.extend_from_slice(&[option::MESSAGE_TYPE, 1, self.kind as u8]);
        vec.extend_from_slice(&[option::SERVER_ID, 4]);
        vec.extend_from_slice(&self.server_id.as_arr());
        vec.extend_from_slice(&[option::SUBNET_MASK, 4]);
        vec.extend_from_slice(&self.mask.to_addr().as_arr());
        vec.extend_from_slice(&[option::ROUTER, 4]);
        vec.extend_from_slice(&self.gateway.as_arr());
        let lease = u32::try_from(self.lease.as_secs()).unwrap_or(u32::MAX);
        vec.extend_from_slice(&[option::LEASE_TIME, 4]);
        vec.extend_from_slice(&lease.to_be_bytes());
        vec.push(option::END);
        vec
    }
}
