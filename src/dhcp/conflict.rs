use std::{collections::HashMap, sync::Arc};

use derivative::Derivative;
use flume::Receiver;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace};

use crate::network::{
    arp::{cache::ArpState, ArpEngine, ArpSeen},
    ipv4::addr::IpV4Addr,
};

type ProbeKey = (String, IpV4Addr);
type PendingBusy = Shared<BoxFuture<'static, bool>>;

#[derive(Derivative)]
#[derivative(Debug)]
struct Probe {
    #[derivative(Debug = "ignore")]
    done: oneshot::Sender<bool>,
    #[derivative(Debug = "ignore")]
    pending: PendingBusy,
}

/// Answers "is this address already in use on the segment" from the ARP
/// cache, an ARP resolution, or a live ARP observation, whichever is first.
#[derive(Debug)]
pub struct DhcpIpConflictDetector {
    arp: Arc<ArpEngine>,
    probes: Mutex<HashMap<ProbeKey, Probe>>,
}

impl DhcpIpConflictDetector {
    pub fn new(arp: Arc<ArpEngine>) -> Self {
        Self {
            arp,
            probes: Mutex::new(HashMap::new()),
        }
    }

    /// `true` when something answers for `ip`. Unbounded on its own; callers
    /// wrap it in a timeout.
    pub async fn probe_ip(self: &Arc<Self>, iface: &str, ip: IpV4Addr) -> bool {
        if let Some(entry) = self.arp.cache().get(ip).await {
            if entry.is_usable() {
                return true;
            }
            if entry.state == ArpState::Failed {
                return false;
            }
        }

        let key = (iface.to_string(), ip);
        let pending = {
            let mut probes = self.probes.lock().await;
            match probes.get(&key) {
                Some(probe) => probe.pending.clone(),
                None => {
                    let (done, rx) = oneshot::channel();
                    let pending = rx.map(|r| r.unwrap_or(false)).boxed().shared();
                    probes.insert(
                        key.clone(),
                        Probe {
                            done,
                            pending: pending.clone(),
                        },
                    );
                    let this = self.clone();
                    tokio::spawn(async move {
                        let busy = this.arp.resolve(&key.0, key.1).await.is_ok();
                        this.complete(&key, busy).await;
                    });
                    pending
                }
            }
        };
        pending.await
    }

    pub async fn on_arp_seen(&self, seen: &ArpSeen) {
        self.complete(&(seen.iface.clone(), seen.ip), true).await;
    }

    async fn complete(&self, key: &ProbeKey, busy: bool) {
        if let Some(probe) = self.probes.lock().await.remove(key) {
            trace!(NIC = %key.0, ip = %key.1, busy, "Probe finished");
            let _ = probe.done.send(busy);
        }
    }

    /// Feeds ARP observations into pending probes until the channel closes.
    pub async fn listen(self: Arc<Self>, seen: Receiver<ArpSeen>) {
        while let Ok(seen) = seen.recv_async().await {
            self.on_arp_seen(&seen).await;
        }
        debug!("ARP observation channel closed");
    }
}
