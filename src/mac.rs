use std::{
    fmt::{Debug, Display},
    num::ParseIntError,
    str::FromStr,
};

use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Mac {
    addr: [u8; 6],
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacParseError {
    #[error("invalid MAC byte: {0}")]
    ParseByteError(ParseIntError),
    #[error("a MAC address has 6 bytes")]
    LengthError,
}

impl FromStr for Mac {
    type Err = MacParseError;

    /// Accepts `aa:bb:cc:dd:ee:ff` as well as `AA-BB-CC-DD-EE-FF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s
            .trim()
            .split(|c| c == '-' || c == ':')
            .map(|s| u8::from_str_radix(s, 16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(MacParseError::ParseByteError)?;

        Ok(Self::new(
            split.try_into().map_err(|_| MacParseError::LengthError)?,
        ))
    }
}

impl Mac {
    pub const fn new(addr: [u8; 6]) -> Self {
        Self { addr }
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        Some(Self::new(data.get(0..6)?.try_into().ok()?))
    }

    pub const fn is_unicast(&self) -> bool {
        (self.addr[0] & 1) == 0
    }

    pub const fn is_multicast(&self) -> bool {
        (self.addr[0] & 1) != 0
    }

    pub fn is_broadcast(&self) -> bool {
        self == &BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        self == &ZERO
    }

    pub const fn as_slice(&self) -> &[u8] {
        &self.addr
    }

    pub const fn octets(self) -> [u8; 6] {
        self.addr
    }
}

impl Debug for Mac {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, f] = self.addr;
        write!(fmt, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{f:02x}")
    }
}

impl Display for Mac {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{self:?}")
    }
}

pub const BROADCAST: Mac = Mac::new([0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
pub const ZERO: Mac = Mac::new([0; 6]);
/// 224.0.0.9 mapped onto the IPv4 multicast MAC range.
pub const RIP_MULTICAST: Mac = Mac::new([0x01, 0x00, 0x5e, 0x00, 0x00, 0x09]);
