//! [`Companion`] – the robot's everyday routines.
//!
//! Wraps the [`Robot`] facade with the behaviours the control loop and the
//! sleep task share: idle (free-play) mode, needs levels, the charge and sleep
//! routines, cue animations, speech and image display.  All state lives in
//! atomics so one `Arc<Companion>` can be handed to a spawned task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pebble_hal::{Randomness, Robot};
use pebble_types::{Affect, Animation, Face, Light, NeedsLevels, PebbleError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::docking::{DockOutcome, Docking, DockingConfig};

/// Head angle that puts the face display in view (44.5°).
const MAX_HEAD_ANGLE_RAD: f64 = 0.7767;

#[derive(Debug, Clone, PartialEq)]
pub struct CompanionConfig {
    /// At or below this voltage, and not charging, the robot needs charging.
    pub low_battery_voltage: f64,
    /// Voltage that maps to full needs levels.
    pub full_battery_voltage: f64,
    /// Bounds, in seconds, of the pause between snores.
    pub snore_interval_secs: (u64, u64),
    /// How long to look for a face that left the field of view.
    pub face_search_timeout: Duration,
    pub image_display_time: Duration,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            low_battery_voltage: 3.4,
            full_battery_voltage: 4.05,
            snore_interval_secs: (30, 60),
            face_search_timeout: Duration::from_secs(30),
            image_display_time: Duration::from_secs(5),
        }
    }
}

pub struct Companion {
    robot: Arc<dyn Robot>,
    docking: Docking,
    config: CompanionConfig,
    freetime: AtomicBool,
    sleeping: AtomicBool,
    cubes_connected: AtomicBool,
}

impl Companion {
    pub fn new(robot: Arc<dyn Robot>, config: CompanionConfig, docking: DockingConfig) -> Self {
        Self {
            docking: Docking::new(Arc::clone(&robot), docking),
            robot,
            config,
            freetime: AtomicBool::new(false),
            sleeping: AtomicBool::new(false),
            cubes_connected: AtomicBool::new(false),
        }
    }

    // ── Power ──────────────────────────────────────────────────────────────

    pub fn battery_voltage(&self) -> f64 {
        self.robot.battery_voltage()
    }

    pub fn needs_charging(&self) -> bool {
        self.robot.battery_voltage() <= self.config.low_battery_voltage
            && !self.robot.is_charging()
    }

    /// Charged means current has stopped flowing.
    pub fn is_charged(&self) -> bool {
        !self.robot.is_charging()
    }

    /// Push needs levels to the robot: `level` when given, otherwise derived
    /// from the battery voltage.
    pub fn update_needs(&self, level: Option<f64>) {
        let needs = match level {
            Some(level) => NeedsLevels::uniform(level),
            None => NeedsLevels::from_battery(
                self.robot.battery_voltage(),
                self.config.full_battery_voltage,
            ),
        };
        self.robot.set_needs_levels(needs);
    }

    // ── Idle mode ──────────────────────────────────────────────────────────

    pub fn is_freetime(&self) -> bool {
        self.freetime.load(Ordering::SeqCst)
    }

    pub fn start_freetime(&self) {
        info!(battery_voltage = self.robot.battery_voltage(), "starting freetime");
        self.update_needs(None);
        self.robot.start_freeplay();
        self.freetime.store(true, Ordering::SeqCst);
    }

    pub fn stop_freetime(&self) {
        if self.freetime.swap(false, Ordering::SeqCst) {
            debug!("stopping freetime");
            self.robot.stop_freeplay();
        }
    }

    /// Stop free-play, abort every running action and wait until the robot
    /// is idle.
    pub async fn stop_all_actions(&self) {
        info!("stopping all actions");
        self.stop_freetime();
        self.robot.abort_all_actions();
        self.robot.stop_all_motors();
        self.robot.wait_for_all_actions_completed().await;
    }

    /// Restore default lights and behaviour before handing the robot back.
    pub fn back_to_normal(&self) {
        self.stop_freetime();
        self.robot.set_backpack_lights(None);
        self.disconnect_cubes();
        self.robot.clear_idle_animation();
    }

    // ── Cubes ──────────────────────────────────────────────────────────────

    pub async fn connect_cubes(&self) {
        let connected = self.robot.connect_to_cubes().await;
        debug!(connected, "cube connection");
        self.cubes_connected.store(connected, Ordering::SeqCst);
    }

    pub fn disconnect_cubes(&self) {
        if self.cubes_connected.swap(false, Ordering::SeqCst) {
            debug!("disconnecting from cubes");
            self.robot.set_cube_lights(None);
            self.robot.disconnect_from_cubes();
        }
    }

    // ── Charging & sleep ───────────────────────────────────────────────────

    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::SeqCst)
    }

    pub async fn dock(&self, rng: &mut Randomness) -> Result<DockOutcome, PebbleError> {
        self.docking.dock(true, rng).await
    }

    pub async fn undock(&self) -> Result<(), PebbleError> {
        self.docking.undock().await
    }

    /// Wind down and get onto the charger.
    pub async fn start_charging_routine(
        &self,
        rng: &mut Randomness,
    ) -> Result<DockOutcome, PebbleError> {
        info!("starting charging routine");
        self.disconnect_cubes();
        self.stop_all_actions().await;
        self.robot.play_animation(Animation::GoToSleepGetIn).await?;
        let outcome = self.dock(rng).await?;
        if outcome != DockOutcome::Success {
            warn!(?outcome, "could not get onto the charger");
        }
        Ok(outcome)
    }

    /// Snore on the charger until charging stops, then drive off.
    pub async fn charge_to_full(&self, rng: &mut Randomness) -> Result<(), PebbleError> {
        info!("charging");
        self.robot.play_animation(Animation::GoToSleepOff).await?;
        while !self.is_charged() {
            self.snore(rng).await?;
        }
        self.update_needs(Some(1.0));
        info!(battery_voltage = self.robot.battery_voltage(), "charged");
        self.undock().await
    }

    /// Dock and doze until [`Companion::wake_up`] clears the sleeping flag,
    /// topping up whenever the battery runs low again.
    pub async fn sleep(&self, rng: &mut Randomness) -> Result<(), PebbleError> {
        self.start_charging_routine(rng).await?;
        info!("sleeping");
        self.sleeping.store(true, Ordering::SeqCst);
        self.robot.play_animation(Animation::GoToSleepOff).await?;
        while self.is_sleeping() {
            debug!(battery_voltage = self.robot.battery_voltage(), "snoozing");
            self.snore(rng).await?;
            if self.needs_charging() {
                self.robot
                    .backup_onto_charger(self.docking.config().backup_time)
                    .await?;
            } else if self.is_charged() && self.robot.is_on_charger() {
                self.robot.drive_off_charger_contacts().await?;
            }
        }
        Ok(())
    }

    /// Run [`Companion::sleep`] on its own task.
    pub fn spawn_sleep(self: &Arc<Self>, mut rng: Randomness) -> SleepTask {
        let cancel = Arc::new(Notify::new());
        let stop = Arc::clone(&cancel);
        let companion = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = stop.notified() => debug!("sleep cancelled"),
                result = companion.sleep(&mut rng) => {
                    if let Err(e) = result {
                        warn!(error = %e, "sleep routine failed");
                    }
                }
            }
            companion.sleeping.store(false, Ordering::SeqCst);
        });
        SleepTask { handle, cancel }
    }

    pub async fn wake_up(&self) -> Result<(), PebbleError> {
        info!("waking up");
        self.sleeping.store(false, Ordering::SeqCst);
        self.connect_cubes().await;
        self.robot.play_animation(Animation::WakeUp).await
    }

    async fn snore(&self, rng: &mut Randomness) -> Result<(), PebbleError> {
        self.robot.play_animation(Animation::Sleeping).await?;
        let (low, high) = self.config.snore_interval_secs;
        tokio::time::sleep(Duration::from_secs(rng.between(low, high))).await;
        Ok(())
    }

    // ── Expression ─────────────────────────────────────────────────────────

    /// Play a random animation of the given tone.
    pub async fn cue(&self, affect: Affect, rng: &mut Randomness) -> Result<(), PebbleError> {
        match rng.choose(Animation::pool(affect)) {
            Some(animation) => {
                debug!(?animation, "cue");
                self.robot.play_animation(*animation).await
            }
            None => Ok(()),
        }
    }

    pub async fn say(&self, text: &str) -> Result<(), PebbleError> {
        info!(text, "speaking");
        self.robot.say_text(text).await
    }

    /// Turn toward `face`, looking for it first if it has left the view.
    pub async fn turn_toward_face(&self, face: &Face) -> Result<(), PebbleError> {
        let visible = self.robot.visible_faces().iter().any(|f| f.id == face.id);
        if !visible {
            debug!(face = face.id, "looking for face");
            if let Err(e) = self
                .robot
                .wait_for_face(self.config.face_search_timeout)
                .await
            {
                debug!(error = %e, "face not found");
            }
        }
        self.robot.turn_towards_face(face).await
    }

    /// Raise the head and lower the lift, then show `image` on the face
    /// display.
    pub async fn show_image(&self, image: &[u8]) -> Result<(), PebbleError> {
        self.robot.set_lift_height(0.0).await?;
        self.robot.set_head_angle(MAX_HEAD_ANGLE_RAD).await?;
        self.robot
            .display_image(image, self.config.image_display_time)
            .await
    }

    /// Show what the camera sees, mirrored.
    pub async fn show_camera_image(&self) -> Result<(), PebbleError> {
        match self.robot.camera_frame() {
            Some(frame) => self.show_image(&frame.mirrored().data).await,
            None => {
                debug!("no camera frame available");
                Ok(())
            }
        }
    }

    pub fn set_lights(&self, light: Option<Light>) {
        self.robot.set_cube_lights(light);
        self.robot.set_backpack_lights(light);
    }
}

/// Handle on a running [`Companion::sleep`] task.
pub struct SleepTask {
    handle: JoinHandle<()>,
    cancel: Arc<Notify>,
}

impl SleepTask {
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the task at its next await point and wait for it to end.
    pub async fn cancel(self) {
        self.cancel.notify_one();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "sleep task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pebble_hal::{SimCommand, SimRobot};
    use pebble_types::Pose;

    fn companion(sim: &Arc<SimRobot>) -> Arc<Companion> {
        Arc::new(Companion::new(
            sim.clone(),
            CompanionConfig::default(),
            DockingConfig::default(),
        ))
    }

    #[test]
    fn needs_charging_threshold() {
        let sim = Arc::new(SimRobot::new().with_battery(3.3));
        let c = companion(&sim);
        assert!(c.needs_charging());
        sim.set_battery(3.4);
        assert!(c.needs_charging());
        sim.set_battery(3.41);
        assert!(!c.needs_charging());
    }

    #[test]
    fn charging_robot_does_not_need_charging() {
        let sim = Arc::new(SimRobot::new().with_battery(3.3).on_charger());
        assert!(!companion(&sim).needs_charging());
    }

    #[test]
    fn needs_follow_battery() {
        let sim = Arc::new(SimRobot::new().with_battery(3.75));
        let c = companion(&sim);
        c.update_needs(None);
        assert_eq!(sim.needs(), Some(NeedsLevels::uniform(0.7)));
        sim.set_battery(2.0);
        c.update_needs(None);
        assert_eq!(sim.needs().map(|n| n.energy), Some(0.1));
        c.update_needs(Some(1.0));
        assert_eq!(sim.needs().map(|n| n.play), Some(1.0));
    }

    #[test]
    fn freetime_toggles_freeplay() {
        let sim = Arc::new(SimRobot::new());
        let c = companion(&sim);
        c.start_freetime();
        assert!(c.is_freetime() && sim.freeplay_active());
        c.stop_freetime();
        assert!(!c.is_freetime() && !sim.freeplay_active());
        // Stopping twice issues a single stop.
        c.stop_freetime();
        let stops = sim
            .commands()
            .iter()
            .filter(|c| **c == SimCommand::StopFreeplay)
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn charge_to_full_snores_until_charged_then_undocks() {
        let sim = Arc::new(
            SimRobot::new()
                .with_battery(3.3)
                .with_charge_duration(Duration::from_secs(100))
                .on_charger(),
        );
        let c = companion(&sim);
        c.charge_to_full(&mut Randomness::new(1)).await.unwrap();
        let snores = sim
            .commands()
            .iter()
            .filter(|c| **c == SimCommand::Animation(Animation::Sleeping))
            .count();
        // 100 s of charging at 30-60 s per snore.
        assert!((2..=4).contains(&snores), "{snores}");
        assert_eq!(sim.needs(), Some(NeedsLevels::uniform(1.0)));
        assert!(!sim.is_on_charger());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_task_docks_and_cancels() {
        let sim = Arc::new(
            SimRobot::new()
                .with_known_charger(Pose::new(300.0, 0.0, 0.0, 0.0, 0))
                .with_charge_duration(Duration::from_secs(3600)),
        );
        let c = companion(&sim);
        let task = c.spawn_sleep(Randomness::new(2));
        assert!(task.is_active());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(c.is_sleeping());
        assert!(sim.is_on_charger());

        task.cancel().await;
        assert!(!c.is_sleeping());
        c.wake_up().await.unwrap();
        assert!(sim.cubes_connected());
        assert_eq!(
            sim.commands().last(),
            Some(&SimCommand::Animation(Animation::WakeUp))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn camera_image_is_mirrored_onto_display() {
        let sim = Arc::new(SimRobot::new());
        companion(&sim).show_camera_image().await.unwrap();
        let commands = sim.commands();
        assert!(commands.contains(&SimCommand::SetLift(0.0)));
        assert_eq!(
            commands.last(),
            Some(&SimCommand::DisplayImage { bytes: 16 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_face_is_searched_before_turning() {
        let sim = Arc::new(SimRobot::new());
        let c = companion(&sim);
        let start = tokio::time::Instant::now();
        c.turn_toward_face(&Face::named(4, "Bob")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(sim.commands(), vec![SimCommand::TurnTowardsFace(4)]);
    }
}
