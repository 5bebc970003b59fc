//! In-process notification channel.
//!
//! [`LoopbackChannel`] stands in for a broker session: outbound publishes fan
//! out over a [`tokio::sync::broadcast`] channel so any number of observers
//! see every status update, and [`LoopbackChannel::inject`] feeds inbound
//! notifications into the controller's queue exactly as a broker delivery
//! would.  Only the most recent [`DEFAULT_CAPACITY`] publishes are kept in
//! the history.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use pebble_types::PebbleError;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::channel::NotificationChannel;
use crate::inbound::InboundSender;

/// Buffered publishes per observer before it lags, and history length.
pub const DEFAULT_CAPACITY: usize = 256;

/// One outbound publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: serde_json::Value,
}

pub struct LoopbackChannel {
    inbound: InboundSender,
    outbound: broadcast::Sender<Published>,
    history: Mutex<VecDeque<Published>>,
    connected: AtomicBool,
}

impl LoopbackChannel {
    pub fn new(inbound: InboundSender) -> Self {
        let (outbound, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            inbound,
            outbound,
            history: Mutex::new(VecDeque::with_capacity(DEFAULT_CAPACITY)),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Deliver `payload` on `topic` as if it arrived from the broker.
    ///
    /// Nothing is delivered while disconnected.  Returns `true` when the
    /// message reached the inbound queue.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        if !self.is_connected() {
            warn!(topic, "loopback disconnected; inbound notification ignored");
            return false;
        }
        self.inbound.deliver(topic, payload)
    }

    /// Observe subsequent publishes on a single topic.
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> TopicObserver {
        TopicObserver {
            topic: topic.into(),
            receiver: self.outbound.subscribe(),
        }
    }

    /// Recent publishes, oldest first.
    pub fn published(&self) -> Vec<Published> {
        self.history().iter().cloned().collect()
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<Published>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl NotificationChannel for LoopbackChannel {
    async fn connect(&self) -> Result<(), PebbleError> {
        self.connected.store(true, Ordering::SeqCst);
        info!("loopback channel connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PebbleError> {
        self.connected.store(false, Ordering::SeqCst);
        info!("loopback channel disconnected");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PebbleError> {
        if !self.is_connected() {
            return Err(PebbleError::Channel(format!(
                "publish on '{topic}' while disconnected"
            )));
        }
        let message = Published {
            topic: topic.to_string(),
            payload,
        };
        {
            let mut history = self.history();
            if history.len() == DEFAULT_CAPACITY {
                history.pop_front();
            }
            history.push_back(message.clone());
        }
        // No observers is a normal condition for a loopback session.
        if let Ok(n) = self.outbound.send(message) {
            debug!(topic, receivers = n, "loopback publish");
        }
        Ok(())
    }
}

/// Receiver filtered to one topic.
pub struct TopicObserver {
    topic: String,
    receiver: broadcast::Receiver<Published>,
}

impl TopicObserver {
    /// Wait for the next publish on this observer's topic.
    ///
    /// Returns `None` once the channel is dropped.
    pub async fn recv(&mut self) -> Option<Published> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.topic == self.topic => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicObserver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
