//! Inbound notification queue.
//!
//! The channel's delivery callback is the single producer; the control loop
//! is the single consumer and drains everything queued at the start of a
//! tick with [`InboundQueue::drain`].  The queue is unbounded so a delivery
//! never blocks the network side.

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One decoded delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Producer half, handed to the channel implementation.  Clone it freely.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl InboundSender {
    /// Decode `payload` as JSON and enqueue it.
    ///
    /// Undecodable payloads are logged and dropped.  Returns `true` when the
    /// message was queued.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        let payload = match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(topic, error = %e, "dropping undecodable notification");
                return false;
            }
        };
        self.push(InboundMessage {
            topic: topic.to_string(),
            payload,
        })
    }

    /// Enqueue an already-decoded message.
    pub fn push(&self, message: InboundMessage) -> bool {
        debug!(topic = %message.topic, "notification queued");
        if self.tx.send(message).is_err() {
            warn!("inbound queue closed; notification dropped");
            return false;
        }
        true
    }
}

/// Consumer half, owned by the control loop.
#[derive(Debug)]
pub struct InboundQueue {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl InboundQueue {
    pub fn new() -> (InboundSender, InboundQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InboundSender { tx }, InboundQueue { rx })
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Take everything queued right now without waiting.
    pub fn drain(&mut self) -> Vec<InboundMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            out.push(message);
        }
        out
    }
}
