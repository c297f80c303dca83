//! Outbound proxy for server-to-client messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

/// Send side of a connection's outbound channel, handed to the backend
/// endpoint as its server-to-client proxy.
///
/// The transport owns the receive side; once the connection closes and
/// the receiver is dropped, sends fail harmlessly, which is how late
/// results are discarded instead of delivered.
#[derive(Clone)]
pub struct OutboundChannel {
    /// Connection id this channel belongs to.
    pub id: String,
    tx: mpsc::Sender<Arc<String>>,
    dropped: Arc<AtomicU64>,
}

impl OutboundChannel {
    /// Wrap an existing sender.
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id: id.into(),
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a channel pair with the given buffer capacity.
    pub fn bounded(id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(id, tx), rx)
    }

    /// Send a text message to the client.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize a JSON value and send it to the client.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total messages dropped on this channel.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
