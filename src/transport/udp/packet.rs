#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    pub source_port: u16,
    pub destination_port: u16,
    pub payload: Vec<u8>,
}

impl UdpPacket {
    pub fn new(source_port: u16, destination_port: u16, payload: Vec<u8>) -> Self {
        Self {
            source_port,
            destination_port,
            payload,
        }
    }

    /// The length field bounds the payload; the checksum is not verified.
    pub fn from_vec(data: &[u8]) -> Option<Self> {
        let source_port = u16::from_be_bytes(data.get(0..2)?.try_into().ok()?);
        let destination_port = u16::from_be_bytes(data.get(2..4)?.try_into().ok()?);
        let length = u16::from_be_bytes(data.get(4..6)?.try_into().ok()?) as usize;
        if length < 8 {
            return None;
        }
        let payload = data.get(8..length)?.to_vec();
        Some(Self {
            source_port,
            destination_port,
            payload,
        })
    }

    /// Checksum is sent as zero (optional over IPv4).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut res = Vec::with_capacity(8 + self.payload.len());
        res.extend_from_slice(&self.source_port.to_be_bytes());
        res.extend_from_slice(&self.destination_port.to_be_bytes());
        res.extend_from_slice(&(self.payload.len() as u16 + 8).to_be_bytes());
        res.extend_from_slice(&(0u16).to_be_bytes());
        res.extend_from_slice(&self.payload);
        res
    }
}
