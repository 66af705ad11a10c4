pub mod arp;
pub mod ipv4;
