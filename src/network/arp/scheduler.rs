use std::{collections::HashMap, sync::Arc, time::Duration};

use derivative::Derivative;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use thiserror::Error;
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use super::packet::ArpPacket;
use crate::{
    interfaces::InterfaceRegistry,
    link::tx::{FrameTx, TxError},
    mac::Mac,
    network::ipv4::addr::IpV4Addr,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no ARP reply after all retries")]
    Timeout,
    #[error("failed to send ARP request: {0}")]
    Send(#[from] TxError),
    #[error("unknown interface {0}")]
    UnknownInterface(String),
    #[error("resolution was cancelled")]
    Cancelled,
}

pub type PendingMac = Shared<BoxFuture<'static, Result<Mac, ResolveError>>>;

type JobKey = (String, IpV4Addr);

#[derive(Derivative)]
#[derivative(Debug)]
struct Job {
    #[derivative(Debug = "ignore")]
    done: oneshot::Sender<Result<Mac, ResolveError>>,
    #[derivative(Debug = "ignore")]
    pending: PendingMac,
    #[derivative(Debug = "ignore")]
    driver: Option<JoinHandle<()>>,
}

/// Sends ARP requests for (interface, target) pairs and retries them until a
/// reply arrives or the retry schedule runs out.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ArpRequestScheduler {
    jobs: Mutex<HashMap<JobKey, Job>>,
    #[derivative(Debug = "ignore")]
    interfaces: Arc<InterfaceRegistry>,
    #[derivative(Debug = "ignore")]
    tx: Arc<dyn FrameTx>,
    delays: Vec<Duration>,
}

impl ArpRequestScheduler {
    pub fn new(
        interfaces: Arc<InterfaceRegistry>,
        tx: Arc<dyn FrameTx>,
        delays: Vec<Duration>,
    ) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            interfaces,
            tx,
            delays,
        }
    }

    /// Returns the pending result for the pair, starting a job if none is
    /// live.
    pub async fn kick(self: &Arc<Self>, iface: &str, target: IpV4Addr) -> PendingMac {
        let key = (iface.to_string(), target);
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get(&key) {
            trace!(NIC = iface, %target, "Joining pending ARP resolution");
            return job.pending.clone();
        }

        let (done, rx) = oneshot::channel();
        let pending = rx
            .map(|r| r.unwrap_or(Err(ResolveError::Cancelled)))
            .boxed()
            .shared();
        let driver = tokio::spawn(self.clone().drive(key.clone()));
        jobs.insert(
            key,
            Job {
                done,
                pending: pending.clone(),
                driver: Some(driver),
            },
        );
        pending
    }

    /// Completes a live job for the pair, if any.
    pub async fn on_learned(&self, iface: &str, ip: IpV4Addr, mac: Mac) {
        if let Some(driver) = self.complete(&(iface.to_string(), ip), Ok(mac)).await {
            driver.abort();
        }
    }

    pub async fn pending_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }

    async fn complete(
        &self,
        key: &JobKey,
        result: Result<Mac, ResolveError>,
    ) -> Option<JoinHandle<()>> {
        let mut job = self.jobs.lock().await.remove(key)?;
        debug!(NIC = %key.0, target = %key.1, ?result, "ARP resolution finished");
        let _ = job.done.send(result);
        job.driver.take()
    }

    async fn drive(self: Arc<Self>, key: JobKey) {
        let mut attempt = 0;
        let result = loop {
            if let Err(e) = self.send_request(&key.0, key.1).await {
                warn!(NIC = %key.0, target = %key.1, "ARP request not sent: {e}");
                break Err(e);
            }
            match self.delays.get(attempt) {
                Some(delay) => {
                    attempt += 1;
                    tokio::time::sleep(*delay).await;
                }
                None => break Err(ResolveError::Timeout),
            }
        };
        self.complete(&key, result).await;
    }

    async fn send_request(&self, iface: &str, target: IpV4Addr) -> Result<(), ResolveError> {
        let nic = self
            .interfaces
            .get(iface)
            .await
            .ok_or_else(|| ResolveError::UnknownInterface(iface.to_string()))?;
        let frame = ArpPacket::new_request(nic.mac, nic.addr, target)
            .into_frame()
            .ok_or(ResolveError::Cancelled)?;
        trace!(NIC = iface, %target, "Sending ARP request");
        self.tx.send(iface, frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        interfaces::Interface,
        link::{ethernet::packet::EthernetPacket, tx::ChannelTx},
        network::ipv4::addr::IpV4Mask,
    };

    const TARGET: IpV4Addr = IpV4Addr::new([10, 0, 0, 2]);
    const PEER: Mac = Mac::new([2, 0, 0, 0, 0, 2]);

    async fn setup() -> (Arc<ArpRequestScheduler>, flume::Receiver<EthernetPacket>) {
        let interfaces = Arc::new(InterfaceRegistry::new());
        interfaces
            .add(Interface::new(
                "eth0",
                Mac::new([2, 0, 0, 0, 0, 1]),
                IpV4Addr::new([10, 0, 0, 1]),
                IpV4Mask::new(24).unwrap(),
            ))
            .await
            .unwrap();
        let tx = Arc::new(ChannelTx::new());
        let rx = tx.bind("eth0").await;
        let delays = crate::config::ArpTimers::default().retry_delays;
        (
            Arc::new(ArpRequestScheduler::new(interfaces, tx, delays)),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_times_out() {
        let (sched, rx) = setup().await;
        let start = tokio::time::Instant::now();
        let result = sched.kick("eth0", TARGET).await.await;
        assert_eq!(result, Err(ResolveError::Timeout));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        assert_eq!(rx.drain().count(), 4);
        assert_eq!(sched.pending_jobs().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_fields() {
        let (sched, rx) = setup().await;
        let _pending = sched.kick("eth0", TARGET).await;
        let frame = rx.recv_async().await.unwrap();
        assert!(frame.get_dest().is_broadcast());
        let arp = ArpPacket::from_vec(&frame.payload).unwrap();
        assert_eq!(arp.target_ip, TARGET);
        assert!(arp.target_mac.is_zero());
        assert_eq!(arp.sender_ip, IpV4Addr::new([10, 0, 0, 1]));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_job() {
        let (sched, rx) = setup().await;
        let a = sched.kick("eth0", TARGET).await;
        let b = sched.kick("eth0", TARGET).await;
        assert_eq!(sched.pending_jobs().await, 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        sched.on_learned("eth0", TARGET, PEER).await;
        assert_eq!(a.await, Ok(PEER));
        assert_eq!(b.await, Ok(PEER));

        // Driver was cancelled: no more requests after the reply.
        let sent = rx.drain().count();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sent, 2);
        assert!(rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn learned_on_other_interface_is_ignored() {
        let (sched, _rx) = setup().await;
        let pending = sched.kick("eth0", TARGET).await;
        sched.on_learned("eth1", TARGET, PEER).await;
        assert_eq!(sched.pending_jobs().await, 1);
        assert_eq!(pending.await, Err(ResolveError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_fails_fast() {
        let (sched, rx) = setup().await;
        drop(rx);
        let result = sched.kick("eth0", TARGET).await.await;
        assert_eq!(
            result,
            Err(ResolveError::Send(TxError::Disconnected("eth0".into())))
        );

        let result = sched.kick("eth9", TARGET).await.await;
        assert_eq!(result, Err(ResolveError::UnknownInterface("eth9".into())));
    }
}
