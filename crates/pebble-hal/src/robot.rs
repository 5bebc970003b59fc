//! The [`Robot`] facade: everything the controller reads from or commands on
//! the physical robot.
//!
//! The vendor SDK (pose tracking, vision, animation playback, motion
//! planning) sits behind this trait.  The controller never talks to the SDK
//! directly, so it runs unchanged against [`SimRobot`][crate::sim::SimRobot]
//! in tests and headless runs.
//!
//! Sensor reads are synchronous snapshots.  Actions are `async` and resolve
//! once the robot reports completion.

use std::time::Duration;

use async_trait::async_trait;
use pebble_types::{
    Animation, Charger, Face, Light, NeedsLevels, ObservedObject, PebbleError, Pose,
};

use crate::camera::CameraFrame;

/// Invoked once when the SDK connection drops.
pub type ConnectionLostCallback = Box<dyn FnOnce() + Send + 'static>;

/// Sensor and actuator facade over the robot SDK.
///
/// Implementations use interior mutability: the control loop and the
/// detached sleep task share one `Arc<dyn Robot>`.
#[async_trait]
pub trait Robot: Send + Sync {
    // ── Sensors ────────────────────────────────────────────────────────────

    fn battery_voltage(&self) -> f64;

    /// `true` while current flows from the charger contacts.
    fn is_charging(&self) -> bool;

    fn is_on_charger(&self) -> bool;

    fn is_picked_up(&self) -> bool;

    fn is_cliff_detected(&self) -> bool;

    fn pose(&self) -> Pose;

    fn visible_faces(&self) -> Vec<Face>;

    /// Visible non-face objects.
    fn visible_objects(&self) -> Vec<ObservedObject>;

    /// Last known charger, if it has ever been observed.  Its pose may not be
    /// comparable with the robot's current pose.
    fn charger(&self) -> Option<Charger>;

    /// Latest head-camera frame.
    fn camera_frame(&self) -> Option<CameraFrame>;

    // ── Observation ────────────────────────────────────────────────────────

    /// Wait until the charger is observed (an already-visible charger counts).
    ///
    /// # Errors
    ///
    /// [`PebbleError::Timeout`] when nothing is seen within `timeout`.
    async fn wait_for_charger(&self, timeout: Duration) -> Result<Charger, PebbleError>;

    /// Wait until any face is observed.
    ///
    /// # Errors
    ///
    /// [`PebbleError::Timeout`] when nothing is seen within `timeout`.
    async fn wait_for_face(&self, timeout: Duration) -> Result<Face, PebbleError>;

    /// Drop the robot's localization so the next pose is measured against a
    /// fresh origin.
    fn invalidate_pose(&self);

    /// Mark the known charger pose as stale.
    fn invalidate_charger_pose(&self);

    // ── Motion ─────────────────────────────────────────────────────────────

    async fn drive_straight(&self, distance_mm: f64, speed_mmps: f64) -> Result<(), PebbleError>;

    /// Run both wheels at `speed_mmps` for `duration` (negative = reverse).
    async fn drive_wheels(&self, speed_mmps: f64, duration: Duration) -> Result<(), PebbleError>;

    async fn turn_in_place(&self, angle_rad: f64) -> Result<(), PebbleError>;

    /// Drive to a pose expressed relative to the robot's current pose.
    async fn go_to_relative_pose(
        &self,
        dx_mm: f64,
        dy_mm: f64,
        dheading_rad: f64,
    ) -> Result<(), PebbleError>;

    /// Drive until `distance_mm` from the charger, facing it.
    async fn go_to_charger(&self, charger: &Charger, distance_mm: f64) -> Result<(), PebbleError>;

    async fn turn_towards_face(&self, face: &Face) -> Result<(), PebbleError>;

    /// Lift height as a ratio, 0.0 (down) to 1.0 (up).
    async fn set_lift_height(&self, height: f64) -> Result<(), PebbleError>;

    async fn set_head_angle(&self, angle_rad: f64) -> Result<(), PebbleError>;

    /// Reverse onto the charger contacts, giving up after `max_drive_time`.
    async fn backup_onto_charger(&self, max_drive_time: Duration) -> Result<(), PebbleError>;

    async fn drive_off_charger_contacts(&self) -> Result<(), PebbleError>;

    fn stop_all_motors(&self);

    fn abort_all_actions(&self);

    async fn wait_for_all_actions_completed(&self);

    // ── Behaviours ─────────────────────────────────────────────────────────

    /// Start the firmware's look-around-in-place scan.
    fn start_look_around(&self);

    fn stop_look_around(&self);

    /// Start autonomous free-play (the idle mode).
    fn start_freeplay(&self);

    fn stop_freeplay(&self);

    fn set_needs_levels(&self, needs: NeedsLevels);

    fn clear_idle_animation(&self);

    async fn play_animation(&self, animation: Animation) -> Result<(), PebbleError>;

    async fn say_text(&self, text: &str) -> Result<(), PebbleError>;

    // ── Lights & display ───────────────────────────────────────────────────

    /// `None` turns the backpack lights off.
    fn set_backpack_lights(&self, light: Option<Light>);

    /// `None` turns the cube lights off.
    fn set_cube_lights(&self, light: Option<Light>);

    fn set_head_light(&self, on: bool);

    /// Show raw image bytes on the face display for `duration`.
    async fn display_image(&self, image: &[u8], duration: Duration) -> Result<(), PebbleError>;

    // ── Cubes ──────────────────────────────────────────────────────────────

    /// Returns `true` when at least one cube connected.
    async fn connect_to_cubes(&self) -> bool;

    fn disconnect_from_cubes(&self);

    // ── Connection ─────────────────────────────────────────────────────────

    fn is_connected(&self) -> bool;

    /// Register `callback` to run once when the SDK connection drops.
    fn on_connection_lost(&self, callback: ConnectionLostCallback);
}
