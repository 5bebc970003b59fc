//! `pebble-middleware` – the link to the home-automation message bus.
//!
//! The controller never speaks to the broker directly.  It publishes status
//! through a [`NotificationChannel`] and reads inbound notifications from an
//! [`InboundQueue`] that the channel's delivery callback fills.
//!
//! # Modules
//!
//! - [`channel`] – the [`NotificationChannel`] trait, [`Topics`] and the
//!   status publish helper.
//! - [`inbound`] – the single-consumer inbound queue drained by the control
//!   loop.
//! - [`loopback`] – in-process channel built on Tokio broadcast channels,
//!   used headless and in tests.

pub mod channel;
pub mod inbound;
pub mod loopback;

pub use channel::{NotificationChannel, Topics, publish_status};
pub use inbound::{InboundMessage, InboundQueue, InboundSender};
pub use loopback::{LoopbackChannel, Published, TopicObserver};
