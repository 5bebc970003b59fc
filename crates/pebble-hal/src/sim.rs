//! In-process robot simulator for CI/CD testing without physical hardware.
//!
//! [`SimRobot`] implements [`Robot`] with a small kinematic model: turns
//! rotate the heading, straight drives move along it, and the charger is
//! "seen" whenever the test says it is in view.  Every action is appended to a
//! command log so tests can assert on exactly what the controller asked for.
//!
//! # Example
//!
//! ```rust
//! use pebble_hal::sim::SimRobot;
//! use pebble_hal::Robot;
//!
//! let robot = SimRobot::new().with_battery(3.3);
//! assert!(robot.battery_voltage() < 3.4);
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use pebble_types::{
    Animation, Charger, EntityId, Face, Light, NeedsLevels, ObservedObject, PebbleError, Pose,
};
use tokio::time::Instant;
use tracing::debug;

use crate::camera::CameraFrame;
use crate::robot::{ConnectionLostCallback, Robot};

/// Identity the simulator gives its single charger.
pub const SIM_CHARGER_ID: EntityId = 99;

/// One recorded facade call.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    DriveStraight { distance_mm: f64, speed_mmps: f64 },
    DriveWheels { speed_mmps: f64, duration: Duration },
    Turn { angle_rad: f64 },
    GoToRelativePose { dx_mm: f64, dy_mm: f64, dheading_rad: f64 },
    GoToCharger { distance_mm: f64 },
    TurnTowardsFace(EntityId),
    SetLift(f64),
    SetHead(f64),
    BackupOntoCharger,
    DriveOffCharger,
    StopAllMotors,
    AbortAllActions,
    StartLookAround,
    StopLookAround,
    StartFreeplay,
    StopFreeplay,
    ClearIdleAnimation,
    Animation(Animation),
    Say(String),
    BackpackLights(Option<Light>),
    CubeLights(Option<Light>),
    HeadLight(bool),
    DisplayImage { bytes: usize },
    ConnectCubes,
    DisconnectCubes,
    InvalidatePose,
    InvalidateChargerPose,
}

struct SimState {
    battery_voltage: f64,
    on_charger: bool,
    charging_until: Option<Instant>,
    charge_duration: Duration,
    picked_up: bool,
    cliff: bool,
    pose: Pose,
    /// Where the charger really is, in the robot's world coordinates.
    charger_truth: Option<Pose>,
    /// What the robot currently believes about the charger.
    charger: Option<Charger>,
    charger_in_view: bool,
    reveal_charger_after_moves: Option<u32>,
    delocalize_on_approach: bool,
    dock_outcomes: VecDeque<bool>,
    failures: VecDeque<PebbleError>,
    faces: Vec<Face>,
    objects: Vec<ObservedObject>,
    needs: Option<NeedsLevels>,
    freeplay: bool,
    backpack: Option<Light>,
    cubes: Option<Light>,
    cubes_connected: bool,
    connected: bool,
    connection_callbacks: Vec<ConnectionLostCallback>,
    log: Vec<SimCommand>,
}

/// Simulated robot.  Share it behind an `Arc` like a real facade.
pub struct SimRobot {
    state: Mutex<SimState>,
}

impl Default for SimRobot {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRobot {
    /// A connected robot at the origin with a healthy battery, off the
    /// charger, and no charger in sight.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                battery_voltage: 4.0,
                on_charger: false,
                charging_until: None,
                charge_duration: Duration::from_secs(90),
                picked_up: false,
                cliff: false,
                pose: Pose::new(0.0, 0.0, 0.0, 0.0, 1),
                charger_truth: None,
                charger: None,
                charger_in_view: false,
                reveal_charger_after_moves: None,
                delocalize_on_approach: false,
                dock_outcomes: VecDeque::new(),
                failures: VecDeque::new(),
                faces: Vec::new(),
                objects: Vec::new(),
                needs: None,
                freeplay: false,
                backpack: None,
                cubes: None,
                cubes_connected: false,
                connected: true,
                connection_callbacks: Vec::new(),
                log: Vec::new(),
            }),
        }
    }

    // ── Builders ───────────────────────────────────────────────────────────

    pub fn with_battery(self, voltage: f64) -> Self {
        self.set_battery(voltage);
        self
    }

    /// Place the charger at `pose` (x, y, z, heading are used; origin is
    /// assigned on observation).  It is not yet in view.
    pub fn with_charger_at(self, pose: Pose) -> Self {
        self.lock().charger_truth = Some(pose);
        self
    }

    /// Place the charger and let the robot already know where it is.
    pub fn with_known_charger(self, pose: Pose) -> Self {
        {
            let mut s = self.lock();
            s.charger_truth = Some(pose);
            Self::observe_charger(&mut s);
        }
        self
    }

    pub fn with_charger_in_view(self) -> Self {
        self.set_charger_in_view(true);
        self
    }

    /// Start on the charger contacts, charging.
    pub fn on_charger(self) -> Self {
        {
            let mut s = self.lock();
            s.on_charger = true;
            s.charging_until = Some(Instant::now() + s.charge_duration);
        }
        self
    }

    /// How long a charge lasts once the robot is on the contacts.
    pub fn with_charge_duration(self, duration: Duration) -> Self {
        self.lock().charge_duration = duration;
        self
    }

    // ── Scenario control ───────────────────────────────────────────────────

    pub fn set_battery(&self, voltage: f64) {
        self.lock().battery_voltage = voltage;
    }

    pub fn set_picked_up(&self, picked_up: bool) {
        self.lock().picked_up = picked_up;
    }

    pub fn set_cliff_detected(&self, cliff: bool) {
        self.lock().cliff = cliff;
    }

    pub fn set_visible_faces(&self, faces: Vec<Face>) {
        self.lock().faces = faces;
    }

    pub fn set_visible_objects(&self, objects: Vec<ObservedObject>) {
        self.lock().objects = objects;
    }

    pub fn set_charger_in_view(&self, in_view: bool) {
        self.lock().charger_in_view = in_view;
    }

    /// Stop charging immediately (battery full).
    pub fn finish_charging(&self) {
        self.lock().charging_until = None;
    }

    /// The charger comes into view after `moves` relative drives.
    pub fn reveal_charger_after_moves(&self, moves: u32) {
        self.lock().reveal_charger_after_moves = Some(moves);
    }

    /// The next `go_to_charger` leaves the robot relocalized against a new
    /// origin, as if it had slipped on the way.
    pub fn delocalize_on_next_approach(&self) {
        self.lock().delocalize_on_approach = true;
    }

    /// Outcomes for upcoming `backup_onto_charger` calls; once exhausted,
    /// docking succeeds.
    pub fn script_dock_outcomes(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.lock().dock_outcomes.extend(outcomes);
    }

    /// Make the next asynchronous action fail with `error`.
    pub fn fail_next_action(&self, error: PebbleError) {
        self.lock().failures.push_back(error);
    }

    /// Simulate the SDK connection dropping; registered callbacks run once.
    pub fn drop_connection(&self) {
        let callbacks = {
            let mut s = self.lock();
            s.connected = false;
            std::mem::take(&mut s.connection_callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    // ── Inspection ─────────────────────────────────────────────────────────

    pub fn commands(&self) -> Vec<SimCommand> {
        self.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().log.clear();
    }

    pub fn spoken(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter_map(|c| match c {
                SimCommand::Say(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn needs(&self) -> Option<NeedsLevels> {
        self.lock().needs
    }

    pub fn freeplay_active(&self) -> bool {
        self.lock().freeplay
    }

    pub fn backpack_light(&self) -> Option<Light> {
        self.lock().backpack
    }

    pub fn cube_light(&self) -> Option<Light> {
        self.lock().cubes
    }

    pub fn cubes_connected(&self) -> bool {
        self.lock().cubes_connected
    }

    // ── Internal helpers ───────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `command` and surface any injected failure.
    fn begin(&self, command: SimCommand) -> Result<MutexGuard<'_, SimState>, PebbleError> {
        let mut s = self.lock();
        debug!(?command, "sim command");
        s.log.push(command);
        match s.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(s),
        }
    }

    fn observe_charger(s: &mut SimState) {
        if let Some(truth) = s.charger_truth {
            s.charger = Some(Charger {
                id: SIM_CHARGER_ID,
                pose: Pose {
                    origin_id: s.pose.origin_id,
                    valid: true,
                    ..truth
                },
            });
        }
    }

    fn charger_visible(s: &SimState) -> bool {
        s.charger_in_view && s.charger_truth.is_some()
    }

    fn count_move(s: &mut SimState) {
        if let Some(remaining) = s.reveal_charger_after_moves.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                s.charger_in_view = true;
                s.reveal_charger_after_moves = None;
            }
        }
        if Self::charger_visible(s) {
            Self::observe_charger(s);
        }
    }
}

#[async_trait]
impl Robot for SimRobot {
    fn battery_voltage(&self) -> f64 {
        self.lock().battery_voltage
    }

    fn is_charging(&self) -> bool {
        let s = self.lock();
        s.on_charger && s.charging_until.is_some_and(|until| Instant::now() < until)
    }

    fn is_on_charger(&self) -> bool {
        self.lock().on_charger
    }

    fn is_picked_up(&self) -> bool {
        self.lock().picked_up
    }

    fn is_cliff_detected(&self) -> bool {
        self.lock().cliff
    }

    fn pose(&self) -> Pose {
        self.lock().pose
    }

    fn visible_faces(&self) -> Vec<Face> {
        self.lock().faces.clone()
    }

    fn visible_objects(&self) -> Vec<ObservedObject> {
        self.lock().objects.clone()
    }

    fn charger(&self) -> Option<Charger> {
        self.lock().charger
    }

    fn camera_frame(&self) -> Option<CameraFrame> {
        Some(CameraFrame {
            width: 4,
            height: 4,
            data: (0u8..16).collect(),
        })
    }

    async fn wait_for_charger(&self, timeout: Duration) -> Result<Charger, PebbleError> {
        {
            let mut s = self.lock();
            if Self::charger_visible(&s) {
                Self::observe_charger(&mut s);
                if let Some(charger) = s.charger {
                    return Ok(charger);
                }
            }
        }
        tokio::time::sleep(timeout).await;
        Err(PebbleError::Timeout("charger".to_string()))
    }

    async fn wait_for_face(&self, timeout: Duration) -> Result<Face, PebbleError> {
        let visible = self.lock().faces.first().cloned();
        if let Some(face) = visible {
            return Ok(face);
        }
        tokio::time::sleep(timeout).await;
        Err(PebbleError::Timeout("face".to_string()))
    }

    fn invalidate_pose(&self) {
        let mut s = self.lock();
        s.log.push(SimCommand::InvalidatePose);
        // The simulated robot relocalizes straight away against a new origin.
        s.pose.origin_id += 1;
    }

    fn invalidate_charger_pose(&self) {
        let mut s = self.lock();
        s.log.push(SimCommand::InvalidateChargerPose);
        if let Some(charger) = s.charger.as_mut() {
            charger.pose.invalidate();
        }
    }

    async fn drive_straight(&self, distance_mm: f64, speed_mmps: f64) -> Result<(), PebbleError> {
        let mut s = self.begin(SimCommand::DriveStraight {
            distance_mm,
            speed_mmps,
        })?;
        let heading = s.pose.heading_rad;
        s.pose.position.x += distance_mm * heading.cos();
        s.pose.position.y += distance_mm * heading.sin();
        Ok(())
    }

    async fn drive_wheels(&self, speed_mmps: f64, duration: Duration) -> Result<(), PebbleError> {
        {
            let mut s = self.begin(SimCommand::DriveWheels {
                speed_mmps,
                duration,
            })?;
            let distance = speed_mmps * duration.as_secs_f64();
            let heading = s.pose.heading_rad;
            s.pose.position.x += distance * heading.cos();
            s.pose.position.y += distance * heading.sin();
            if distance != 0.0 {
                s.on_charger = false;
                s.charging_until = None;
            }
        }
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn turn_in_place(&self, angle_rad: f64) -> Result<(), PebbleError> {
        let mut s = self.begin(SimCommand::Turn { angle_rad })?;
        s.pose.heading_rad += angle_rad;
        Ok(())
    }

    async fn go_to_relative_pose(
        &self,
        dx_mm: f64,
        dy_mm: f64,
        dheading_rad: f64,
    ) -> Result<(), PebbleError> {
        let mut s = self.begin(SimCommand::GoToRelativePose {
            dx_mm,
            dy_mm,
            dheading_rad,
        })?;
        let (sin, cos) = s.pose.heading_rad.sin_cos();
        s.pose.position.x += dx_mm * cos - dy_mm * sin;
        s.pose.position.y += dx_mm * sin + dy_mm * cos;
        s.pose.heading_rad += dheading_rad;
        Self::count_move(&mut s);
        Ok(())
    }

    async fn go_to_charger(&self, charger: &Charger, distance_mm: f64) -> Result<(), PebbleError> {
        let mut s = self.begin(SimCommand::GoToCharger { distance_mm })?;
        let stop = charger.front_point(distance_mm);
        s.pose.position = stop;
        s.pose.heading_rad = charger.pose.heading_rad;
        if std::mem::take(&mut s.delocalize_on_approach) {
            s.pose.origin_id += 1;
        }
        Ok(())
    }

    async fn turn_towards_face(&self, face: &Face) -> Result<(), PebbleError> {
        let _s = self.begin(SimCommand::TurnTowardsFace(face.id))?;
        Ok(())
    }

    async fn set_lift_height(&self, height: f64) -> Result<(), PebbleError> {
        let _s = self.begin(SimCommand::SetLift(height))?;
        Ok(())
    }

    async fn set_head_angle(&self, angle_rad: f64) -> Result<(), PebbleError> {
        let _s = self.begin(SimCommand::SetHead(angle_rad))?;
        Ok(())
    }

    async fn backup_onto_charger(&self, _max_drive_time: Duration) -> Result<(), PebbleError> {
        let mut s = self.begin(SimCommand::BackupOntoCharger)?;
        let docked = s.dock_outcomes.pop_front().unwrap_or(true);
        if docked {
            s.on_charger = true;
            s.charging_until = Some(Instant::now() + s.charge_duration);
        }
        Ok(())
    }

    async fn drive_off_charger_contacts(&self) -> Result<(), PebbleError> {
        let mut s = self.begin(SimCommand::DriveOffCharger)?;
        s.on_charger = false;
        s.charging_until = None;
        Ok(())
    }

    fn stop_all_motors(&self) {
        self.lock().log.push(SimCommand::StopAllMotors);
    }

    fn abort_all_actions(&self) {
        self.lock().log.push(SimCommand::AbortAllActions);
    }

    async fn wait_for_all_actions_completed(&self) {}

    fn start_look_around(&self) {
        self.lock().log.push(SimCommand::StartLookAround);
    }

    fn stop_look_around(&self) {
        self.lock().log.push(SimCommand::StopLookAround);
    }

    fn start_freeplay(&self) {
        let mut s = self.lock();
        s.log.push(SimCommand::StartFreeplay);
        s.freeplay = true;
    }

    fn stop_freeplay(&self) {
        let mut s = self.lock();
        s.log.push(SimCommand::StopFreeplay);
        s.freeplay = false;
    }

    fn set_needs_levels(&self, needs: NeedsLevels) {
        self.lock().needs = Some(needs);
    }

    fn clear_idle_animation(&self) {
        self.lock().log.push(SimCommand::ClearIdleAnimation);
    }

    async fn play_animation(&self, animation: Animation) -> Result<(), PebbleError> {
        let _s = self.begin(SimCommand::Animation(animation))?;
        Ok(())
    }

    async fn say_text(&self, text: &str) -> Result<(), PebbleError> {
        let _s = self.begin(SimCommand::Say(text.to_string()))?;
        Ok(())
    }

    fn set_backpack_lights(&self, light: Option<Light>) {
        let mut s = self.lock();
        s.log.push(SimCommand::BackpackLights(light));
        s.backpack = light;
    }

    fn set_cube_lights(&self, light: Option<Light>) {
        let mut s = self.lock();
        s.log.push(SimCommand::CubeLights(light));
        s.cubes = light;
    }

    fn set_head_light(&self, on: bool) {
        self.lock().log.push(SimCommand::HeadLight(on));
    }

    async fn display_image(&self, image: &[u8], _duration: Duration) -> Result<(), PebbleError> {
        let _s = self.begin(SimCommand::DisplayImage { bytes: image.len() })?;
        Ok(())
    }

    async fn connect_to_cubes(&self) -> bool {
        let mut s = self.lock();
        s.log.push(SimCommand::ConnectCubes);
        s.cubes_connected = true;
        true
    }

    fn disconnect_from_cubes(&self) {
        let mut s = self.lock();
        s.log.push(SimCommand::DisconnectCubes);
        s.cubes_connected = false;
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn on_connection_lost(&self, callback: ConnectionLostCallback) {
        self.lock().connection_callbacks.push(callback);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
