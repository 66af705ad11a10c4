use super::{addr::IpV4Addr, protocol::ProtocolType};

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ECN {
    NotECT = 0b00,
    ECT0 = 0b01,
    ECT1 = 0b10,
    CE = 0b11,
}

impl ECN {
    const fn from_bits(b: u8) -> Self {
        match b & 0b11 {
            0b00 => Self::NotECT,
            0b01 => Self::ECT0,
            0b10 => Self::ECT1,
            _ => Self::CE,
        }
    }
}

bitflags::bitflags! {
    /// 3 bit
    pub struct Flags: u8 {
        /// Dont fragment
        const DF = 0b010;
        /// More fragments
        const MF = 0b001;
    }
}

pub const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpV4Header {
    /// Differentiated Services Code Point
    pub dscp: u8, // 6 bit
    /// Explicit Congestion Notification
    pub ecn: ECN, // 2 bit

    pub identification: u16,

    pub flags: Flags,         // 3 bit
    pub fragment_offset: u16, // 13 bit

    pub time_to_live: u8,

    pub protocol: ProtocolType,

    pub source: IpV4Addr,
    pub destination: IpV4Addr,

    pub options: Vec<u8>,
}

/// One's complement of the one's complement sum of the 16 bit words.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = bytes
        .chunks(2)
        .map(|x| match x {
            [a, b] => u16::from_be_bytes([*a, *b]) as u32,
            [a] => u16::from_be_bytes([*a, 0]) as u32,
            _ => 0,
        })
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

impl IpV4Header {
    pub fn new(
        protocol: ProtocolType,
        source: IpV4Addr,
        destination: IpV4Addr,
        time_to_live: u8,
    ) -> Self {
        Self {
            dscp: 0,
            ecn: ECN::NotECT,
            identification: 0,
            flags: Flags::empty(),
            fragment_offset: 0,
            time_to_live,
            protocol,
            source,
            destination,
            options: Vec::new(),
        }
    }

    pub fn header_len(&self) -> usize {
        20 + self.options.len()
    }

    fn to_vec_checksum(&self, total_length: u16, checksum: u16) -> Vec<u8> {
        let mut vec = Vec::with_capacity(self.header_len());
        let ihl = ((self.header_len() / 4) & 0x0f) as u8;
        vec.push(0x40 | ihl);
        vec.push(((self.dscp & 0b00111111) << 2) | ((self.ecn as u8) & 0b11));
        vec.extend_from_slice(&total_length.to_be_bytes());
        vec.extend_from_slice(&self.identification.to_be_bytes());
        vec.extend_from_slice(
            &((self.fragment_offset & 0x1fff) | (((self.flags.bits() & 0b111) as u16) << 13))
                .to_be_bytes(),
        );
        vec.push(self.time_to_live);
        vec.push(self.protocol.inner());
        vec.extend_from_slice(&checksum.to_be_bytes());
        vec.extend_from_slice(&self.source.as_arr());
        vec.extend_from_slice(&self.destination.as_arr());
        vec.extend_from_slice(&self.options);
        vec
    }

    fn to_vec(&self, payload_len: usize) -> Vec<u8> {
        let total_length = (self.header_len() + payload_len) as u16;
        let sum = checksum(&self.to_vec_checksum(total_length, 0));
        self.to_vec_checksum(total_length, sum)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Packet {
    pub header: IpV4Header,
    pub payload: Vec<u8>,
}

impl Ipv4Packet {
    pub fn new(header: IpV4Header, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Parses a header with a valid checksum. Bytes past the total length
    /// (Ethernet padding) are dropped.
    pub fn from_vec(data: &[u8]) -> Option<Self> {
        if data.len() < 20 || data[0] >> 4 != 4 {
            return None;
        }
        let header_len = (data[0] & 0x0f) as usize * 4;
        let total_length = u16::from_be_bytes(data[2..4].try_into().ok()?) as usize;
        if header_len < 20 || total_length < header_len || data.len() < total_length {
            return None;
        }
        if checksum(&data[..header_len]) != 0 {
            return None;
        }
        let frag = u16::from_be_bytes(data[6..8].try_into().ok()?);
        let header = IpV4Header {
            dscp: data[1] >> 2,
            ecn: ECN::from_bits(data[1]),
            identification: u16::from_be_bytes(data[4..6].try_into().ok()?),
            flags: Flags::from_bits_truncate((frag >> 13) as u8),
            fragment_offset: frag & 0x1fff,
            time_to_live: data[8],
            protocol: ProtocolType::new(data[9]),
            source: IpV4Addr::from_slice(&data[12..16])?,
            destination: IpV4Addr::from_slice(&data[16..20])?,
            options: data[20..header_len].to_vec(),
        };
        Some(Self {
            header,
            payload: data[header_len..total_length].to_vec(),
        })
    }

    /// Length and checksum are always recomputed.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec = self.header.to_vec(self.payload.len());
        vec.extend_from_slice(&self.payload);
        vec
    }
}
