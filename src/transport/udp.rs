use crate::{
    link::ethernet::packet::EthernetPacket,
    mac::Mac,
    network::ipv4::{
        addr::IpV4Addr,
        packet::{IpV4Header, Ipv4Packet},
        protocol::ProtocolType,
    },
};

use self::packet::UdpPacket;

pub mod packet;

/// Addressing for a UDP datagram carried in an Ethernet frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpEndpoints {
    pub src_mac: Mac,
    pub dst_mac: Mac,
    pub src_ip: IpV4Addr,
    pub dst_ip: IpV4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub ttl: u8,
}

pub fn build_frame(endpoints: UdpEndpoints, payload: Vec<u8>) -> Option<EthernetPacket> {
    let udp = UdpPacket::new(endpoints.src_port, endpoints.dst_port, payload);
    let ip = Ipv4Packet::new(
        IpV4Header::new(
            ProtocolType::UDP,
            endpoints.src_ip,
            endpoints.dst_ip,
            endpoints.ttl,
        ),
        udp.to_vec(),
    );
    EthernetPacket::new_ip_v4(endpoints.dst_mac, endpoints.src_mac, ip.to_vec())
}
