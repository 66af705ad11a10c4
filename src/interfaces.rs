use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    mac::Mac,
    network::ipv4::addr::{Cidr, IpV4Addr, IpV4Mask},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterfaceError {
    #[error("interface {0} already exists")]
    Duplicate(String),
    #[error("unknown interface {0}")]
    Unknown(String),
}

/// A logical layer 3 interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub mac: Mac,
    pub addr: IpV4Addr,
    pub mask: IpV4Mask,
}

impl Interface {
    pub fn new(name: impl Into<String>, mac: Mac, addr: IpV4Addr, mask: IpV4Mask) -> Self {
        Self {
            name: name.into(),
            mac,
            addr,
            mask,
        }
    }

    pub fn cidr(&self) -> Cidr {
        Cidr::new(self.addr, self.mask)
    }

    pub fn network(&self) -> IpV4Addr {
        self.addr.network(self.mask)
    }

    pub fn contains(&self, addr: IpV4Addr) -> bool {
        addr.in_subnet(self.addr, self.mask)
    }
}

/// Owned table of configured interfaces, shared as `Arc<InterfaceRegistry>`.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    interfaces: RwLock<HashMap<String, Interface>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, iface: Interface) -> Result<(), InterfaceError> {
        let mut interfaces = self.interfaces.write().await;
        if interfaces.contains_key(&iface.name) {
            return Err(InterfaceError::Duplicate(iface.name));
        }
        interfaces.insert(iface.name.clone(), iface);
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<Interface, InterfaceError> {
        self.interfaces
            .write()
            .await
            .remove(name)
            .ok_or_else(|| InterfaceError::Unknown(name.to_string()))
    }

    pub async fn get(&self, name: &str) -> Option<Interface> {
        self.interfaces.read().await.get(name).cloned()
    }

    /// Sorted by name.
    pub async fn all(&self) -> Vec<Interface> {
        let mut all: Vec<_> = self.interfaces.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn is_own_mac(&self, mac: Mac) -> bool {
        self.interfaces.read().await.values().any(|i| i.mac == mac)
    }
}
