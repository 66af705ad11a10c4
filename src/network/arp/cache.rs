use std::{collections::HashMap, fmt::Display, time::Duration};

use chrono::{DateTime, Local};
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, trace};

use crate::{config::ArpTimers, mac::Mac, network::ipv4::addr::IpV4Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArpState {
    Incomplete,
    Reachable,
    Stale,
    Failed,
}

impl Display for ArpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Incomplete => "INCOMPLETE",
            Self::Reachable => "REACHABLE",
            Self::Stale => "STALE",
            Self::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: IpV4Addr,
    pub mac: Option<Mac>,
    pub state: ArpState,
    /// Drives aging.
    pub updated: Instant,
    /// For display only.
    pub updated_at: DateTime<Local>,
}

impl ArpEntry {
    fn new(ip: IpV4Addr, state: ArpState) -> Self {
        Self {
            ip,
            mac: None,
            state,
            updated: Instant::now(),
            updated_at: Local::now(),
        }
    }

    fn touch(&mut self, state: ArpState) {
        self.state = state;
        self.updated = Instant::now();
        self.updated_at = Local::now();
    }

    pub fn is_usable(&self) -> bool {
        self.state == ArpState::Reachable && self.mac.is_some()
    }

    pub fn age(&self) -> Duration {
        self.updated.elapsed()
    }
}

/// One resolution state per IPv4 address, shared by every interface.
#[derive(Debug)]
pub struct ArpCache {
    table: RwLock<HashMap<IpV4Addr, ArpEntry>>,
    timers: ArpTimers,
}

impl ArpCache {
    pub fn new(timers: ArpTimers) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            timers,
        }
    }

    /// Forces REACHABLE with `mac`, creating the entry if needed.
    pub async fn learned(&self, ip: IpV4Addr, mac: Mac) {
        let mut table = self.table.write().await;
        let entry = table
            .entry(ip)
            .or_insert_with(|| ArpEntry::new(ip, ArpState::Incomplete));
        entry.mac = Some(mac);
        entry.touch(ArpState::Reachable);
        trace!(%ip, %mac, "ARP entry learned");
    }

    pub async fn begin_resolve(&self, ip: IpV4Addr) -> ArpEntry {
        let mut table = self.table.write().await;
        let entry = table
            .entry(ip)
            .or_insert_with(|| ArpEntry::new(ip, ArpState::Incomplete));
        entry.touch(ArpState::Incomplete);
        entry.clone()
    }

    pub async fn mark_failed(&self, ip: IpV4Addr) {
        if let Some(entry) = self.table.write().await.get_mut(&ip) {
            entry.touch(ArpState::Failed);
            debug!(%ip, "ARP resolution failed");
        }
    }

    pub async fn get(&self, ip: IpV4Addr) -> Option<ArpEntry> {
        self.table.read().await.get(&ip).cloned()
    }

    pub async fn remove(&self, ip: IpV4Addr) -> Option<ArpEntry> {
        self.table.write().await.remove(&ip)
    }

    pub async fn snapshot(&self) -> Vec<ArpEntry> {
        let mut entries: Vec<_> = self.table.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.ip);
        entries
    }

    /// REACHABLE past its lifetime goes STALE (restarting the clock), STALE
    /// past its lifetime is evicted.
    pub async fn sweep_at(&self, now: Instant) {
        let (reachable, stale) = (self.timers.reachable, self.timers.stale);
        self.table.write().await.retain(|ip, entry| {
            let age = now.saturating_duration_since(entry.updated);
            match entry.state {
                ArpState::Reachable if age > reachable => {
                    trace!(%ip, "ARP entry stale");
                    entry.state = ArpState::Stale;
                    entry.updated = now;
                    true
                }
                ArpState::Stale if age > stale => {
                    trace!(%ip, "ARP entry evicted");
                    false
                }
                _ => true,
            }
        });
    }

    /// Runs the aging sweep forever.
    pub async fn aging_loop(&self) {
        let mut interval = tokio::time::interval(self.timers.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.sweep_at(Instant::now()).await;
        }
    }

    pub async fn print(&self) -> prettytable::Table {
        let mut table = prettytable::table!(["address", "mac", "state", "age (s)", "updated"]);
        for entry in self.snapshot().await {
            table.add_row(prettytable::row![
                entry.ip,
                entry.mac.map(|m| m.to_string()).unwrap_or_default(),
                entry.state,
                entry.age().as_secs(),
                entry.updated_at.format("%H:%M:%S")
            ]);
        }
        table
    }
}
