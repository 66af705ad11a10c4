use std::{
    fmt::{Debug, Display},
    num::ParseIntError,
    ops::BitAnd,
    str::FromStr,
};

use thiserror::Error;

/// An IPv4 address kept as its big-endian `u32` value, so ordering is plain
/// unsigned ordering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IpV4Addr(u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrParseError {
    #[error("invalid octet: {0}")]
    ParseByteError(ParseIntError),
    #[error("an IPv4 address has 4 octets")]
    LengthError,
    #[error("prefix length {0} is out of range 0..=32")]
    PrefixLength(u32),
    #[error("invalid prefix length: {0}")]
    ParsePrefixError(ParseIntError),
    #[error("missing '/len' in CIDR {0:?}")]
    MissingPrefix(String),
    #[error("mask {0} is not a contiguous run of high bits")]
    NonContiguousMask(IpV4Addr),
}

impl FromStr for IpV4Addr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s
            .trim()
            .split('.')
            .map(u8::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AddrParseError::ParseByteError)?;

        Ok(Self::new(
            split.try_into().map_err(|_| AddrParseError::LengthError)?,
        ))
    }
}

impl IpV4Addr {
    pub const fn new(addr: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(addr))
    }

    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }

    pub const fn as_arr(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        Some(Self::new(data.get(0..4)?.try_into().ok()?))
    }

    pub fn network(self, mask: IpV4Mask) -> Self {
        mask & self
    }

    pub fn broadcast(self, mask: IpV4Mask) -> Self {
        Self(self.0 | !mask.bits())
    }

    pub fn in_subnet(self, network: IpV4Addr, mask: IpV4Mask) -> bool {
        self.network(mask) == network.network(mask)
    }

    pub const fn is_loopback(self) -> bool {
        self.as_arr()[0] == 127
    }

    pub const fn is_link_local(self) -> bool {
        let [a, b, ..] = self.as_arr();
        a == 169 && b == 254
    }

    pub const fn is_multicast(self) -> bool {
        let a = self.as_arr()[0];
        a >= 224 && a <= 239
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == u32::MAX
    }

    pub const fn is_unspecified(self) -> bool {
        self.0 == 0
    }

    /// RFC 1918 ranges.
    pub const fn is_private(self) -> bool {
        match self.as_arr() {
            [10, ..] => true,
            [172, b, ..] => b >= 16 && b <= 31,
            [192, 168, ..] => true,
            _ => false,
        }
    }

    pub const fn is_unicast(self) -> bool {
        !self.is_loopback()
            && !self.is_link_local()
            && !self.is_multicast()
            && !self.is_broadcast()
            && !self.is_unspecified()
    }
}

impl Debug for IpV4Addr {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.as_arr();
        write!(fmt, "{a}.{b}.{c}.{d}")
    }
}

impl Display for IpV4Addr {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{self:?}")
    }
}

impl From<std::net::Ipv4Addr> for IpV4Addr {
    fn from(value: std::net::Ipv4Addr) -> Self {
        Self::new(value.octets())
    }
}

impl From<IpV4Addr> for std::net::Ipv4Addr {
    fn from(value: IpV4Addr) -> Self {
        value.as_arr().into()
    }
}

pub const BROADCAST: IpV4Addr = IpV4Addr::new([255, 255, 255, 255]);
pub const DEFAULT: IpV4Addr = IpV4Addr::new([0, 0, 0, 0]);
pub const LOOPBACK: IpV4Addr = IpV4Addr::new([127, 0, 0, 1]);
pub const RIP_MULTICAST: IpV4Addr = IpV4Addr::new([224, 0, 0, 9]);

/// A prefix length, always within 0..=32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpV4Mask(u8);

impl IpV4Mask {
    pub const HOST: Self = Self(32);
    pub const ANY: Self = Self(0);

    pub fn new(len: u8) -> Result<Self, AddrParseError> {
        if len > 32 {
            Err(AddrParseError::PrefixLength(len as u32))
        } else {
            Ok(Self(len))
        }
    }

    /// 255.255.255.0 -> /24. Rejects masks with holes.
    pub fn from_addr(mask: IpV4Addr) -> Result<Self, AddrParseError> {
        let bits = mask.to_u32();
        let len = bits.leading_ones();
        if bits.count_ones() != len {
            return Err(AddrParseError::NonContiguousMask(mask));
        }
        Ok(Self(len as u8))
    }

    pub const fn len(self) -> u8 {
        self.0
    }

    pub const fn bits(self) -> u32 {
        match self.0 {
            0 => 0,
            n => u32::MAX << (32 - n as u32),
        }
    }

    pub const fn to_addr(self) -> IpV4Addr {
        IpV4Addr::from_u32(self.bits())
    }
}

impl TryFrom<u8> for IpV4Mask {
    type Error = AddrParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Display for IpV4Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl BitAnd<IpV4Addr> for IpV4Mask {
    type Output = IpV4Addr;

    fn bitand(self, rhs: IpV4Addr) -> Self::Output {
        IpV4Addr::from_u32(rhs.to_u32() & self.bits())
    }
}

/// `A.B.C.D/len`. The address keeps its host bits; use [`Cidr::network`] for
/// the prefix itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    pub addr: IpV4Addr,
    pub mask: IpV4Mask,
}

impl Cidr {
    pub const fn new(addr: IpV4Addr, mask: IpV4Mask) -> Self {
        Self { addr, mask }
    }

    pub fn network(&self) -> IpV4Addr {
        self.addr.network(self.mask)
    }

    pub fn broadcast(&self) -> IpV4Addr {
        self.addr.broadcast(self.mask)
    }

    pub fn contains(&self, addr: IpV4Addr) -> bool {
        addr.in_subnet(self.addr, self.mask)
    }
}

impl FromStr for Cidr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| AddrParseError::MissingPrefix(s.to_string()))?;
        let len = u32::from_str(len).map_err(AddrParseError::ParsePrefixError)?;
        let len = u8::try_from(len).map_err(|_| AddrParseError::PrefixLength(len))?;
        Ok(Self::new(addr.parse()?, IpV4Mask::new(len)?))
    }
}

impl Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.addr, self.mask)
    }
}
