//! Inbound command decoding and the weather announcement.
//!
//! [`decode`] maps a queued [`InboundMessage`] to a [`Command`] by topic:
//!
//! | Topic | Payload | Command |
//! |---|---|---|
//! | control | `{"msg": "sleep"}` | [`Command::Sleep`] |
//! | control | `{"msg": "freetime"}` | [`Command::Freetime`] |
//! | weather | `{"msg": "...", "imagePath": "..."}` | [`Command::Weather`] |
//!
//! Anything else decodes to `None` and is ignored.

use pebble_hal::Randomness;
use pebble_middleware::{InboundMessage, Topics};
use pebble_types::{Affect, Light, PebbleError, Rgb};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::companion::Companion;

/// Spoken before every weather message.
pub const WEATHER_LEAD_IN: &str = "I have a weather update notification for you.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Sleep,
    Freetime,
    Weather(WeatherNotice),
}

/// Payload of the weather topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeatherNotice {
    #[serde(rename = "msg")]
    pub message: String,
    /// `http(s)://` URL or local file path of an image to show.
    #[serde(rename = "imagePath", default)]
    pub image_path: Option<String>,
}

impl WeatherNotice {
    /// Light colour matching the forecast keywords, if any.
    pub fn color(&self) -> Option<Rgb> {
        if self.message.contains("clear") {
            Some(Rgb::WARM_YELLOW)
        } else if self.message.contains("cloudy") {
            Some(Rgb::SLATE_GRAY)
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
struct ControlMessage {
    msg: String,
}

pub fn decode(message: &InboundMessage, topics: &Topics) -> Option<Command> {
    if message.topic == topics.control {
        let control = ControlMessage::deserialize(&message.payload).ok()?;
        match control.msg.as_str() {
            "sleep" => Some(Command::Sleep),
            "freetime" => Some(Command::Freetime),
            other => {
                debug!(msg = other, "ignoring control message");
                None
            }
        }
    } else if message.topic == topics.weather {
        match WeatherNotice::deserialize(&message.payload) {
            Ok(notice) => Some(Command::Weather(notice)),
            Err(e) => {
                debug!(error = %e, "ignoring weather payload");
                None
            }
        }
    } else {
        debug!(topic = %message.topic, "ignoring message on unknown topic");
        None
    }
}

/// Fetch image bytes from a URL or read them from disk.
pub async fn load_image(path: &str) -> Result<Vec<u8>, PebbleError> {
    if path.starts_with("http://") || path.starts_with("https://") {
        let response = reqwest::get(path)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PebbleError::Image(format!("{path}: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PebbleError::Image(format!("{path}: {e}")))?;
        Ok(bytes.to_vec())
    } else {
        tokio::fs::read(path)
            .await
            .map_err(|e| PebbleError::Image(format!("{path}: {e}")))
    }
}

/// Flash the lights, speak the lead-in and the message, show the image.
///
/// An image that fails to load is logged; the announcement still completes.
/// Lights turned on here are switched off again even when a step fails.
pub async fn announce(
    companion: &Companion,
    notice: &WeatherNotice,
    rng: &mut Randomness,
) -> Result<(), PebbleError> {
    let light = notice.color().map(|c| Light::solid(c).flash());
    if light.is_some() {
        companion.set_lights(light);
    }

    let result = async {
        companion.cue(Affect::Positive, rng).await?;
        companion.say(WEATHER_LEAD_IN).await?;
        companion.say(&notice.message).await?;

        if let Some(path) = &notice.image_path {
            match load_image(path).await {
                Ok(image) => {
                    info!(path = %path, bytes = image.len(), "showing weather image");
                    companion.show_image(&image).await?;
                }
                Err(e) => warn!(error = %e, "weather image unavailable"),
            }
        }
        Ok::<(), PebbleError>(())
    }
    .await;

    if light.is_some() {
        companion.set_lights(None);
    }
    result
}
