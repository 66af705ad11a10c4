use std::{cmp::Reverse, collections::BTreeMap};

use flume::{Receiver, Sender};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::{Proto, RouteChange, RouteEntry, RouteError, RouteKey, RIP_INFINITY};
use crate::network::ipv4::addr::{IpV4Addr, IpV4Mask};

type Table = BTreeMap<RouteKey, RouteEntry>;

#[derive(Debug, Default)]
struct RibInner {
    connected: Table,
    statics: Table,
    rip: Table,
    subscribers: Vec<Sender<RouteChange>>,
}

impl RibInner {
    fn all(&self) -> impl Iterator<Item = &RouteEntry> {
        self.connected
            .values()
            .chain(self.statics.values())
            .chain(self.rip.values())
    }

    fn publish(&mut self, change: RouteChange) {
        if change.is_empty() {
            return;
        }
        trace!(?change, "RIB changed");
        self.subscribers
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    fn upsert(&mut self, table: fn(&mut Self) -> &mut Table, entry: RouteEntry) {
        let previous = table(self).insert(entry.key(), entry.clone());
        if previous.as_ref() != Some(&entry) {
            debug!(route = %entry, "Route installed");
            self.publish(RouteChange {
                added_or_updated: vec![entry],
                removed: vec![],
            });
        }
    }

    fn remove(&mut self, table: fn(&mut Self) -> &mut Table, key: RouteKey) -> Option<RouteEntry> {
        let removed = table(self).remove(&key)?;
        debug!(route = %removed, "Route removed");
        self.publish(RouteChange {
            added_or_updated: vec![],
            removed: vec![removed.clone()],
        });
        Some(removed)
    }
}

/// Routing information base: connected, static and RIP tables kept apart and
/// reconciled at lookup time.
#[derive(Debug, Default)]
pub struct Rib {
    inner: RwLock<RibInner>,
}

impl Rib {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self) -> Receiver<RouteChange> {
        let (tx, rx) = flume::unbounded();
        self.inner.write().await.subscribers.push(tx);
        rx
    }

    pub async fn upsert_connected(&self, entry: RouteEntry) {
        self.inner.write().await.upsert(|i| &mut i.connected, entry)
    }

    pub async fn remove_connected(&self, network: IpV4Addr, mask: IpV4Mask) -> Option<RouteEntry> {
        self.inner
            .write()
            .await
            .remove(|i| &mut i.connected, RouteKey::new(network, mask))
    }

    /// Without an outbound interface the route takes the one of the connected
    /// route covering its next hop.
    pub async fn upsert_static(&self, entry: RouteEntry) -> Result<RouteEntry, RouteError> {
        let mut inner = self.inner.write().await;
        let entry = match (entry.out_if(), entry.next_hop()) {
            (Some(_), _) => entry,
            (None, None) => return Err(RouteError::MissingField("next_hop")),
            (None, Some(nh)) => {
                let out_if = inner
                    .connected
                    .values()
                    .find(|c| c.contains(nh))
                    .and_then(|c| c.out_if())
                    .ok_or(RouteError::UnresolvableNextHop(nh))?
                    .to_string();
                entry.with_out_if(out_if)
            }
        };
        inner.upsert(|i| &mut i.statics, entry.clone());
        Ok(entry)
    }

    pub async fn remove_static(&self, network: IpV4Addr, mask: IpV4Mask) -> Option<RouteEntry> {
        self.inner
            .write()
            .await
            .remove(|i| &mut i.statics, RouteKey::new(network, mask))
    }

    pub async fn upsert_rip(&self, entry: RouteEntry) -> Result<(), RouteError> {
        if entry.proto() != Proto::Rip || entry.distance() != Proto::Rip.default_distance() {
            return Err(RouteError::NotRip(entry.proto(), entry.distance()));
        }
        self.inner.write().await.upsert(|i| &mut i.rip, entry);
        Ok(())
    }

    /// With `learned_from` set, only a route held from that neighbor is
    /// removed.
    pub async fn remove_rip(
        &self,
        network: IpV4Addr,
        mask: IpV4Mask,
        learned_from: Option<IpV4Addr>,
    ) -> Option<RouteEntry> {
        let key = RouteKey::new(network, mask);
        let mut inner = self.inner.write().await;
        let current = inner.rip.get(&key)?;
        if learned_from.is_some() && current.learned_from() != learned_from {
            return None;
        }
        inner.remove(|i| &mut i.rip, key)
    }

    pub async fn get_rip(&self, network: IpV4Addr, mask: IpV4Mask) -> Option<RouteEntry> {
        self.inner
            .read()
            .await
            .rip
            .get(&RouteKey::new(network, mask))
            .cloned()
    }

    /// Longest prefix, then lowest distance, then lowest metric. Remaining
    /// ties go to the first in connected, static, RIP order. Poisoned RIP
    /// routes are not candidates, so a covering route carries the traffic
    /// while they wait for garbage collection.
    pub async fn lookup(&self, addr: IpV4Addr) -> Option<RouteEntry> {
        self.inner
            .read()
            .await
            .all()
            .filter(|r| r.contains(addr))
            .filter(|r| r.proto() != Proto::Rip || r.metric() < RIP_INFINITY)
            .min_by_key(|r| (Reverse(r.mask()), r.distance(), r.metric()))
            .cloned()
    }

    /// Every route of every table, most specific first.
    pub async fn snapshot(&self) -> Vec<RouteEntry> {
        let mut all: Vec<_> = self.inner.read().await.all().cloned().collect();
        all.sort_by_key(|r| (r.key(), r.distance()));
        all
    }

    pub async fn print(&self) -> prettytable::Table {
        let mut table = prettytable::table!([
            "proto", "network", "mask", "next hop", "interface", "AD", "metric", "from"
        ]);
        for route in self.snapshot().await {
            table.add_row(prettytable::row![
                route.proto(),
                route.network(),
                route.mask(),
                route.next_hop().map(|a| a.to_string()).unwrap_or_default(),
                route.out_if().unwrap_or_default(),
                route.distance(),
                route.metric(),
                route.learned_from().map(|a| a.to_string()).unwrap_or_default()
            ]);
        }
        table
    }
}
