use std::collections::HashMap;

use flume::{Receiver, Sender};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::trace;

use super::ethernet::packet::EthernetPacket;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("interface {0} is not bound for transmission")]
    NotBound(String),
    #[error("transmit queue for {0} is closed")]
    Disconnected(String),
}

/// Where frames leave the router.
#[async_trait::async_trait]
pub trait FrameTx: Send + Sync {
    async fn send(&self, iface: &str, frame: EthernetPacket) -> Result<(), TxError>;
}

/// Hands outgoing frames to a capture layer through one `flume` queue per
/// interface.
#[derive(Debug, Default)]
pub struct ChannelTx {
    queues: RwLock<HashMap<String, Sender<EthernetPacket>>>,
}

impl ChannelTx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the queue for `iface` and returns its consuming end. Binding
    /// again replaces the previous queue.
    pub async fn bind(&self, iface: &str) -> Receiver<EthernetPacket> {
        let (tx, rx) = flume::unbounded();
        self.queues.write().await.insert(iface.to_string(), tx);
        rx
    }

    pub async fn unbind(&self, iface: &str) -> bool {
        self.queues.write().await.remove(iface).is_some()
    }
}

#[async_trait::async_trait]
impl FrameTx for ChannelTx {
    async fn send(&self, iface: &str, frame: EthernetPacket) -> Result<(), TxError> {
        let tx = self
            .queues
            .read()
            .await
            .get(iface)
            .cloned()
            .ok_or_else(|| TxError::NotBound(iface.to_string()))?;
        trace!(NIC = iface, dest = ?frame.get_dest(), "Sending frame");
        tx.send_async(frame)
            .await
            .map_err(|_| TxError::Disconnected(iface.to_string()))
    }
}
