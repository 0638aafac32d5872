use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{LedgerError, Result};

/// An encoded ledger message as it travels on the overlay.
pub type Frame = Vec<u8>;

/// Overlay boundary used by the ledger.
///
/// A real deployment backs this with a pub/sub topic on the peer-to-peer
/// host; the ledger only needs to broadcast frames and receive everyone
/// else's. Delivery is best effort: lost frames are repaired by periodic
/// snapshots.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Broadcast a frame to every subscribed peer.
    async fn publish(&self, frame: Frame) -> Result<()>;

    /// Receive frames published by any peer, including this one.
    fn subscribe(&self) -> broadcast::Receiver<Frame>;
}

/// In-process broadcast hub connecting ledgers in the same process.
///
/// Every transport handed out by the hub sees every frame published on it,
/// which makes a hub behave like a fully connected mesh with instant
/// delivery.
#[derive(Clone)]
pub struct LocalHub {
    sender: broadcast::Sender<Frame>,
}

impl LocalHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// A transport endpoint attached to this hub.
    pub fn transport(&self) -> HubTransport {
        HubTransport {
            sender: self.sender.clone(),
        }
    }

    /// Number of endpoints currently listening.
    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One endpoint of a [`LocalHub`].
#[derive(Clone)]
pub struct HubTransport {
    sender: broadcast::Sender<Frame>,
}

#[async_trait]
impl Transport for HubTransport {
    async fn publish(&self, frame: Frame) -> Result<()> {
        // No listeners is not an error: the mesh is simply empty right now.
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(frame)
            .map(|_| ())
            .map_err(|e| LedgerError::Transport(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }
}
