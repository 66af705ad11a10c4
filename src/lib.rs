//! A software IPv4 router core: ARP with proxy-ARP, a DHCP server, RIPv2, a
//! routing information base and the forwarding path that ties them together.
//!
//! Frames enter through [`router::Router::on_frame`] (or a bound receive
//! queue) and leave through a [`link::tx::FrameTx`].

pub mod config;
pub mod dhcp;
pub mod forward;
pub mod interfaces;
pub mod link;
pub mod mac;
pub mod network;
pub mod process;
pub mod rip;
pub mod route;
pub mod router;
pub mod transport;
