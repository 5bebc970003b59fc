//! The notification channel seam.
//!
//! Pebble never links a broker client into its core.  A
//! [`NotificationChannel`] implementation owns the connection and translates
//! outbound publishes into its wire protocol; inbound deliveries are pushed
//! into the [`InboundQueue`][crate::inbound::InboundQueue] through an
//! [`InboundSender`][crate::inbound::InboundSender] the implementation holds.

use async_trait::async_trait;
use pebble_types::{PebbleError, StatusReport};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Every message-bus client must implement this trait.
///
/// # Contract
///
/// * `connect` – open the session and subscribe to the inbound topics.
/// * `disconnect` – close the session; publishing afterwards is an error.
/// * `publish` – send one JSON payload on `topic`.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn connect(&self) -> Result<(), PebbleError>;

    async fn disconnect(&self) -> Result<(), PebbleError>;

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PebbleError>;
}

/// Topic names used on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    /// Inbound weather notifications.
    pub weather: String,
    /// Inbound control commands (`sleep`, `freetime`).
    pub control: String,
    /// Outbound lifecycle status.
    pub status: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            weather: "home-assistant/cozmo/notification".to_string(),
            control: "home-assistant/cozmo/control".to_string(),
            status: "cozmo/status".to_string(),
        }
    }
}

/// Serialize `report` and publish it on the status topic.
pub async fn publish_status(
    channel: &dyn NotificationChannel,
    topics: &Topics,
    report: &StatusReport,
) -> Result<(), PebbleError> {
    let payload =
        serde_json::to_value(report).map_err(|e| PebbleError::Serialization(e.to_string()))?;
    debug!(topic = %topics.status, status = %report.status, "publishing status");
    channel.publish(&topics.status, payload).await
}
