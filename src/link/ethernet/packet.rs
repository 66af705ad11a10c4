use crate::mac::Mac;

use super::ethertype::EtherType;

pub const HEADER_LEN: usize = 14;
pub const MAX_PAYLOAD: usize = 1500;

/// An untagged Ethernet II frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetPacket {
    destination: Mac,
    source: Mac,
    ether_type: EtherType,
    pub payload: Vec<u8>,
}

impl EthernetPacket {
    fn with_type(
        destination: Mac,
        source: Mac,
        ether_type: EtherType,
        payload: Vec<u8>,
    ) -> Option<Self> {
        if payload.len() <= MAX_PAYLOAD {
            Some(Self {
                destination,
                source,
                ether_type,
                payload,
            })
        } else {
            None
        }
    }

    pub fn new_ip_v4(destination: Mac, source: Mac, payload: Vec<u8>) -> Option<Self> {
        Self::with_type(destination, source, EtherType::IP_V4, payload)
    }

    pub fn new_arp(destination: Mac, source: Mac, payload: Vec<u8>) -> Option<Self> {
        Self::with_type(destination, source, EtherType::ARP, payload)
    }

    pub const fn get_dest(&self) -> Mac {
        self.destination
    }

    pub const fn get_source(&self) -> Mac {
        self.source
    }

    pub const fn get_ether_type(&self) -> EtherType {
        self.ether_type
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(HEADER_LEN + self.payload.len());
        vec.extend_from_slice(self.destination.as_slice());
        vec.extend_from_slice(self.source.as_slice());
        vec.extend_from_slice(&self.ether_type.to_u16().to_be_bytes());
        vec.extend_from_slice(&self.payload);
        vec
    }

    pub fn from_vec(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let destination = Mac::from_slice(&data[0..6])?;
        let source = Mac::from_slice(&data[6..12])?;
        let ether_type = EtherType::from_u16(u16::from_be_bytes(data[12..14].try_into().ok()?));
        Some(Self {
            destination,
            source,
            ether_type,
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}
