use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity assigned by the vision layer to a face or object.
pub type EntityId = u64;

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// A point in the robot's world frame, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to `other`, including the z axis.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Position plus heading, tagged with the localization origin it was measured
/// against.
///
/// Poses measured against different origins (or invalidated after the robot
/// was moved) must never be subtracted from each other; check
/// [`Pose::is_comparable`] first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Position,
    /// Rotation about the z axis, radians.
    pub heading_rad: f64,
    pub origin_id: u32,
    pub valid: bool,
}

impl Pose {
    /// Create a valid pose measured against `origin_id`.
    pub fn new(x: f64, y: f64, z: f64, heading_rad: f64, origin_id: u32) -> Self {
        Self {
            position: Position::new(x, y, z),
            heading_rad,
            origin_id,
            valid: true,
        }
    }

    /// `true` when both poses are valid and share a localization origin.
    pub fn is_comparable(&self, other: &Pose) -> bool {
        self.valid && other.valid && self.origin_id == other.origin_id
    }

    /// Mark the pose as stale.  It stays stale until the vision layer
    /// re-observes the entity.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Observable entities
// ────────────────────────────────────────────────────────────────────────────

/// The robot's charging dock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Charger {
    pub id: EntityId,
    pub pose: Pose,
}

impl Charger {
    /// Point `offset_mm` in front of the charger, along the reverse of its
    /// heading vector.  This is where the robot lines up before reversing
    /// onto the contacts.
    pub fn front_point(&self, offset_mm: f64) -> Position {
        let p = self.pose.position;
        Position::new(
            p.x - offset_mm * self.pose.heading_rad.cos(),
            p.y - offset_mm * self.pose.heading_rad.sin(),
            p.z,
        )
    }
}

/// Facial expression estimated by the vision layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Happy,
    Sad,
    Angry,
    Surprised,
    Neutral,
}

/// A face currently or recently in view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: EntityId,
    /// Enrolled name, `None` for strangers.
    pub name: Option<String>,
    pub expression: Option<Expression>,
}

impl Face {
    pub fn named(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            expression: None,
        }
    }

    pub fn stranger(id: EntityId) -> Self {
        Self {
            id,
            name: None,
            expression: None,
        }
    }

    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }
}

/// Coarse classification of a visible object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Face,
    Cube,
    Charger,
    Unknown,
}

/// A non-face object in view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservedObject {
    pub id: EntityId,
    pub kind: ObjectKind,
}

// ────────────────────────────────────────────────────────────────────────────
// Lights & animations
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WARM_YELLOW: Rgb = Rgb::new(255, 255, 0);
    pub const SLATE_GRAY: Rgb = Rgb::new(119, 136, 153);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightPattern {
    Solid,
    Flashing,
}

/// Colour and pattern for the cube or backpack LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Light {
    pub color: Rgb,
    pub pattern: LightPattern,
}

impl Light {
    pub fn solid(color: Rgb) -> Self {
        Self {
            color,
            pattern: LightPattern::Solid,
        }
    }

    pub fn flash(self) -> Self {
        Self {
            pattern: LightPattern::Flashing,
            ..self
        }
    }
}

/// Emotional tone of a cue animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affect {
    Positive,
    Negative,
}

/// Animation triggers understood by the robot firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Animation {
    MajorWin,
    Happy,
    Yes,
    Amazed,
    Celebrate,
    WheelieStart,
    AteFullEnough,
    DriveEndHappy,
    BlockReact,
    MajorFail,
    CubeMovedUpset,
    Unhappy,
    PounceFail,
    Bored,
    FrustratedMajor,
    GoToSleepGetIn,
    GoToSleepOff,
    Sleeping,
    WakeUp,
}

impl Animation {
    const POSITIVE: [Animation; 9] = [
        Animation::MajorWin,
        Animation::Happy,
        Animation::Yes,
        Animation::Amazed,
        Animation::Celebrate,
        Animation::WheelieStart,
        Animation::AteFullEnough,
        Animation::DriveEndHappy,
        Animation::BlockReact,
    ];

    const NEGATIVE: [Animation; 6] = [
        Animation::MajorFail,
        Animation::CubeMovedUpset,
        Animation::Unhappy,
        Animation::PounceFail,
        Animation::Bored,
        Animation::FrustratedMajor,
    ];

    /// Candidate animations for a cue of the given tone.
    pub fn pool(affect: Affect) -> &'static [Animation] {
        match affect {
            Affect::Positive => &Self::POSITIVE,
            Affect::Negative => &Self::NEGATIVE,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Needs
// ────────────────────────────────────────────────────────────────────────────

/// Lower bound for every needs level.
pub const MIN_NEEDS_LEVEL: f64 = 0.1;

/// The robot's repair / energy / play needs, each in `[0.1, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeedsLevels {
    pub repair: f64,
    pub energy: f64,
    pub play: f64,
}

impl NeedsLevels {
    /// All three needs at the same level, clamped and rounded to two decimals.
    pub fn uniform(level: f64) -> Self {
        let level = (level.clamp(MIN_NEEDS_LEVEL, 1.0) * 100.0).round() / 100.0;
        Self {
            repair: level,
            energy: level,
            play: level,
        }
    }

    /// Derive needs from the battery: a full battery (`full_voltage`) maps to
    /// 1.0 and every volt below it removes 1.0.
    pub fn from_battery(voltage: f64, full_voltage: f64) -> Self {
        Self::uniform(1.0 - (full_voltage - voltage))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lifecycle & status reporting
// ────────────────────────────────────────────────────────────────────────────

/// Coarse controller state, reported on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    #[serde(rename = "Connection lost")]
    ConnectionLost,
    Disconnected,
    Connected,
    Freetime,
    #[serde(rename = "Going to charge")]
    GoingToCharge,
    Charging,
    Sleeping,
    #[serde(rename = "Picked up")]
    PickedUp,
    #[serde(rename = "On cliff")]
    OnCliff,
    #[serde(rename = "Saw face")]
    SawFace,
    // Consumers of the status topic already match on this spelling.
    #[serde(rename = "Anouncing")]
    Announcing,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::ConnectionLost => "Connection lost",
            LifecycleState::Disconnected => "Disconnected",
            LifecycleState::Connected => "Connected",
            LifecycleState::Freetime => "Freetime",
            LifecycleState::GoingToCharge => "Going to charge",
            LifecycleState::Charging => "Charging",
            LifecycleState::Sleeping => "Sleeping",
            LifecycleState::PickedUp => "Picked up",
            LifecycleState::OnCliff => "On cliff",
            LifecycleState::SawFace => "Saw face",
            LifecycleState::Announcing => "Anouncing",
        }
    }

    /// `ConnectionLost` ends the control loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::ConnectionLost)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_voltage: Option<f64>,
}

/// Payload published on the status topic whenever the lifecycle state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: LifecycleState,
    pub attributes: StatusAttributes,
}

impl StatusReport {
    pub fn new(status: LifecycleState, battery_voltage: Option<f64>) -> Self {
        Self {
            status,
            attributes: StatusAttributes { battery_voltage },
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type covering robot actions, observation timeouts and
/// the notification channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PebbleError {
    /// Another action already holds the robot's motion tracks.
    #[error("Robot busy: {0}")]
    RobotBusy(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Action '{action}' failed: {details}")]
    ActionFailed { action: String, details: String },

    #[error("Connection to the robot was lost")]
    ConnectionLost,

    #[error("Notification channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Image error: {0}")]
    Image(String),
}

impl PebbleError {
    pub fn action(action: impl Into<String>, details: impl Into<String>) -> Self {
        PebbleError::ActionFailed {
            action: action.into(),
            details: details.into(),
        }
    }
}
