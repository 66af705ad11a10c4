use std::{collections::HashSet, sync::Arc};

use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyArpConfigInner {
    pub enabled: bool,
    /// Interfaces excluded while proxying is globally on.
    pub disabled_on: HashSet<String>,
}

impl ProxyArpConfigInner {
    pub fn allows(&self, iface: &str) -> bool {
        self.enabled && !self.disabled_on.contains(iface)
    }

    pub fn set_interface(&mut self, iface: &str, enabled: bool) {
        if enabled {
            self.disabled_on.remove(iface);
        } else {
            self.disabled_on.insert(iface.to_string());
        }
    }
}

impl Default for ProxyArpConfigInner {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled_on: HashSet::new(),
        }
    }
}

pub type ProxyArpConfig = Arc<RwLock<ProxyArpConfigInner>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_interface_override() {
        let mut cfg = ProxyArpConfigInner::default();
        assert!(cfg.allows("eth0"));
        cfg.set_interface("eth0", false);
        assert!(!cfg.allows("eth0"));
        assert!(cfg.allows("eth1"));
        cfg.enabled = false;
        assert!(!cfg.allows("eth1"));
        cfg.enabled = true;
        cfg.set_interface("eth0", true);
        assert!(cfg.allows("eth0"));
    }
}
