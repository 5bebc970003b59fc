//! Docking and alignment.
//!
//! [`Docking::dock`] takes the robot from anywhere in the room onto the
//! charger contacts:
//!
//! 1. **Locate** – reuse the known charger when its pose is comparable with
//!    the robot's, otherwise alternate a stationary look-around with a drive
//!    to a random nearby pose followed by a head-light scan.
//! 2. **Approach** – drive to within `approach_distance_mm` of the charger.
//! 3. **Adjust** – line up on the point `offset_mm` in front of the charger:
//!    face it, drive to it, face the charger heading.  In critical mode the
//!    charger is re-observed and the pass repeats until both tolerances hold.
//! 4. **Final maneuver** – turn around, raise the lift and back onto the
//!    contacts.
//! 5. **Verify** – on the charger means success; otherwise drive away,
//!    forget both poses and start over, at most `max_restarts` times.
//!
//! No geometry is ever computed between poses that are not comparable.  When
//! the robot loses its localization mid-procedure the adjustment is abandoned
//! and the charger is searched for again.

use std::f64::consts::{PI, TAU};
use std::sync::Arc;
use std::time::Duration;

use pebble_hal::{Randomness, Robot};
use pebble_types::{Affect, Animation, Charger, PebbleError};
use tracing::{debug, info, instrument, warn};

/// Equivalent rotation in `(-π, π]`, so the robot never turns the long way
/// round.
pub fn minimal_turn(angle_rad: f64) -> f64 {
    let mut a = angle_rad % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DockingConfig {
    /// Distance of the alignment point in front of the charger.
    pub offset_mm: f64,
    /// Drive speed during the final adjustment.
    pub speed_mmps: f64,
    pub tolerance_position_mm: f64,
    pub tolerance_angle_rad: f64,
    /// Attempts per search strategy.
    pub max_search_attempts: u32,
    pub look_around_timeout: Duration,
    /// Half-width of the square the random search poses are drawn from.
    pub search_step_mm: f64,
    pub approach_distance_mm: f64,
    pub approach_retries: u32,
    pub reobserve_timeout: Duration,
    /// Cap on critical adjustment passes before the final maneuver.
    pub max_adjust_passes: u32,
    pub backup_time: Duration,
    pub lift_height: f64,
    pub max_restarts: u32,
    pub undock_distance_mm: f64,
    pub undock_speed_mmps: f64,
}

impl Default for DockingConfig {
    fn default() -> Self {
        Self {
            offset_mm: 40.0,
            speed_mmps: 40.0,
            tolerance_position_mm: 10.0,
            tolerance_angle_rad: 5.0_f64.to_radians(),
            max_search_attempts: 5,
            look_around_timeout: Duration::from_secs(10),
            search_step_mm: 150.0,
            approach_distance_mm: 80.0,
            approach_retries: 5,
            reobserve_timeout: Duration::from_secs(2),
            max_adjust_passes: 8,
            backup_time: Duration::from_secs(5),
            lift_height: 0.5,
            max_restarts: 3,
            undock_distance_mm: 100.0,
            undock_speed_mmps: 100.0,
        }
    }
}

/// Result of one [`Docking::dock`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockOutcome {
    /// The robot is on the charger contacts.
    Success,
    /// The charger could not be found.
    NotFound,
    /// Alignment kept failing after every allowed restart.
    Aborted,
}

/// How a round of final adjustment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustment {
    Aligned,
    /// Pass cap reached without meeting tolerance.
    Exhausted,
    /// Robot and charger poses stopped being comparable.
    LostLocalization,
}

// ────────────────────────────────────────────────────────────────────────────
// Docking
// ────────────────────────────────────────────────────────────────────────────

pub struct Docking {
    robot: Arc<dyn Robot>,
    config: DockingConfig,
}

impl Docking {
    pub fn new(robot: Arc<dyn Robot>, config: DockingConfig) -> Self {
        Self { robot, config }
    }

    pub fn config(&self) -> &DockingConfig {
        &self.config
    }

    /// Get onto the charger.
    ///
    /// With `critical` set the alignment is verified against tolerance before
    /// reversing; otherwise a single adjustment pass is made.
    ///
    /// # Errors
    ///
    /// Any failed robot action other than an observation timeout.
    #[instrument(skip(self, rng))]
    pub async fn dock(
        &self,
        critical: bool,
        rng: &mut Randomness,
    ) -> Result<DockOutcome, PebbleError> {
        if self.robot.is_on_charger() {
            debug!("already on the charger");
            return Ok(DockOutcome::Success);
        }
        info!("getting on the charger");
        self.robot.set_head_angle(0.0).await?;

        let mut restarts = 0u32;
        loop {
            let Some(charger) = self.locate(rng).await? else {
                warn!("charger not found");
                return Ok(DockOutcome::NotFound);
            };
            self.approach(&charger).await?;

            if self.adjust(charger, critical).await? == Adjustment::LostLocalization {
                if restarts >= self.config.max_restarts {
                    return Ok(DockOutcome::Aborted);
                }
                restarts += 1;
                warn!(restarts, "localization lost during adjustment, searching again");
                continue;
            }

            self.back_onto_charger().await?;
            if self.robot.is_on_charger() {
                info!(restarts, "docked");
                return Ok(DockOutcome::Success);
            }

            if restarts >= self.config.max_restarts {
                warn!(restarts, "docking aborted");
                self.robot.stop_all_motors();
                return Ok(DockOutcome::Aborted);
            }
            restarts += 1;
            warn!(restarts, "not on the contacts, restarting");
            self.restart().await?;
        }
    }

    /// Drive off the charger and clear of it.  No-op when not on the charger.
    #[instrument(skip(self))]
    pub async fn undock(&self) -> Result<(), PebbleError> {
        if !self.robot.is_on_charger() {
            return Ok(());
        }
        info!("getting off the charger");
        self.robot.drive_off_charger_contacts().await?;
        self.robot
            .drive_straight(self.config.undock_distance_mm, self.config.undock_speed_mmps)
            .await
    }

    // ── Locate ────────────────────────────────────────────────────────────

    async fn locate(&self, rng: &mut Randomness) -> Result<Option<Charger>, PebbleError> {
        if let Some(charger) = self.comparable_charger() {
            debug!("charger position already known");
            return Ok(Some(charger));
        }

        for attempt in 1..=self.config.max_search_attempts {
            debug!(attempt, "looking around for the charger");
            self.robot.start_look_around();
            let seen = self
                .robot
                .wait_for_charger(self.config.look_around_timeout)
                .await;
            self.robot.stop_look_around();
            match seen {
                Ok(charger) => return self.found(charger, rng).await,
                Err(PebbleError::Timeout(_)) => self.cue(Affect::Negative, rng).await?,
                Err(e) => return Err(e),
            }

            debug!(attempt, "driving around looking for the charger");
            self.go_to_random_pose(rng).await?;
            self.blink_head_light().await;
            if let Some(charger) = self.comparable_charger() {
                return self.found(charger, rng).await;
            }
            self.cue(Affect::Negative, rng).await?;
        }
        Ok(None)
    }

    async fn found(
        &self,
        charger: Charger,
        rng: &mut Randomness,
    ) -> Result<Option<Charger>, PebbleError> {
        info!(charger = charger.id, "found the charger");
        self.cue(Affect::Positive, rng).await?;
        Ok(Some(charger))
    }

    fn comparable_charger(&self) -> Option<Charger> {
        self.robot
            .charger()
            .filter(|c| c.pose.is_comparable(&self.robot.pose()))
    }

    async fn go_to_random_pose(&self, rng: &mut Randomness) -> Result<(), PebbleError> {
        let step = self.config.search_step_mm;
        let x = if rng.coin() { step } else { -step };
        let y = if rng.coin() { step } else { -step };
        let heading = rng.choose(&[-40.0_f64, 0.0, 40.0]).copied().unwrap_or(0.0);
        self.robot
            .go_to_relative_pose(x, y, heading.to_radians())
            .await
    }

    async fn blink_head_light(&self) {
        let step = Duration::from_millis(250);
        self.robot.set_head_light(false);
        tokio::time::sleep(step).await;
        self.robot.set_head_light(true);
        tokio::time::sleep(step).await;
        self.robot.set_head_light(false);
    }

    async fn cue(&self, affect: Affect, rng: &mut Randomness) -> Result<(), PebbleError> {
        match rng.choose(Animation::pool(affect)) {
            Some(animation) => self.robot.play_animation(*animation).await,
            None => Ok(()),
        }
    }

    // ── Approach ──────────────────────────────────────────────────────────

    async fn approach(&self, charger: &Charger) -> Result<(), PebbleError> {
        let attempts = self.config.approach_retries.max(1);
        let mut attempt = 1;
        loop {
            match self
                .robot
                .go_to_charger(charger, self.config.approach_distance_mm)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "approach failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ── Adjust ────────────────────────────────────────────────────────────

    async fn adjust(&self, mut charger: Charger, critical: bool) -> Result<Adjustment, PebbleError> {
        let passes = if critical {
            self.config.max_adjust_passes.max(1)
        } else {
            1
        };

        for pass in 1..=passes {
            let pose = self.robot.pose();
            if !charger.pose.is_comparable(&pose) {
                return Ok(Adjustment::LostLocalization);
            }

            let target = charger.front_point(self.config.offset_mm);
            let distance = pose.position.distance_to(&target);
            let bearing = if distance > f64::EPSILON {
                (target.y - pose.position.y).atan2(target.x - pose.position.x)
            } else {
                pose.heading_rad
            };
            debug!(pass, distance, "adjusting in front of the charger");

            self.robot
                .turn_in_place(minimal_turn(bearing - pose.heading_rad))
                .await?;
            self.robot
                .drive_straight(distance, self.config.speed_mmps)
                .await?;
            self.robot
                .turn_in_place(minimal_turn(charger.pose.heading_rad - bearing))
                .await?;

            if !critical {
                return Ok(Adjustment::Aligned);
            }

            match self
                .robot
                .wait_for_charger(self.config.reobserve_timeout)
                .await
            {
                Ok(seen) => charger = seen,
                Err(PebbleError::Timeout(_)) => {
                    warn!("cannot see the charger to verify alignment, using last known pose");
                }
                Err(e) => return Err(e),
            }

            let pose = self.robot.pose();
            if !charger.pose.is_comparable(&pose) {
                return Ok(Adjustment::LostLocalization);
            }
            let target = charger.front_point(self.config.offset_mm);
            let distance_error = pose.position.distance_to(&target);
            let angle_error = minimal_turn(pose.heading_rad - charger.pose.heading_rad).abs();
            debug!(distance_error, angle_error, "alignment check");
            if distance_error < self.config.tolerance_position_mm
                && angle_error < self.config.tolerance_angle_rad
            {
                return Ok(Adjustment::Aligned);
            }
        }

        warn!(passes, "alignment tolerance not reached");
        Ok(Adjustment::Exhausted)
    }

    // ── Final maneuver & restart ──────────────────────────────────────────

    async fn back_onto_charger(&self) -> Result<(), PebbleError> {
        self.robot.set_head_angle(0.0).await?;
        self.robot.turn_in_place(-PI).await?;
        self.robot.set_lift_height(self.config.lift_height).await?;
        self.robot.backup_onto_charger(self.config.backup_time).await
    }

    async fn restart(&self) -> Result<(), PebbleError> {
        self.robot.stop_all_motors();
        self.robot.set_lift_height(self.config.lift_height).await?;
        self.robot.invalidate_pose();
        self.robot.invalidate_charger_pose();
        self.robot
            .drive_wheels(80.0, Duration::from_secs(2))
            .await?;
        self.robot.turn_in_place(-PI).await?;
        self.robot.set_lift_height(0.0).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pebble_hal::{SimCommand, SimRobot};
    use pebble_types::Pose;

    fn docking(sim: &Arc<SimRobot>) -> Docking {
        Docking::new(sim.clone(), DockingConfig::default())
    }

    fn charger_pose() -> Pose {
        Pose::new(400.0, 120.0, 0.0, 0.6, 0)
    }

    #[test]
    fn minimal_turn_range_and_periodicity() {
        for i in -720..=720 {
            let theta = i as f64 * 0.05;
            let m = minimal_turn(theta);
            assert!(m > -PI - 1e-12 && m <= PI + 1e-12, "{theta} -> {m}");
            for k in [-3.0, -1.0, 1.0, 2.0] {
                let shifted = minimal_turn(theta + k * TAU);
                assert!((shifted - m).abs() < 1e-9, "{theta} + {k}τ");
            }
        }
        assert!((minimal_turn(PI) - PI).abs() < 1e-12);
        assert!((minimal_turn(-PI) - PI).abs() < 1e-12);
        assert!((minimal_turn(1.5 * PI) + 0.5 * PI).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn already_on_charger_is_success() {
        let sim = Arc::new(SimRobot::new().on_charger());
        let outcome = docking(&sim)
            .dock(true, &mut Randomness::new(1))
            .await
            .unwrap();
        assert_eq!(outcome, DockOutcome::Success);
        assert!(sim.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn known_charger_docks_without_searching() {
        let sim = Arc::new(SimRobot::new().with_known_charger(charger_pose()));
        let outcome = docking(&sim)
            .dock(true, &mut Randomness::new(1))
            .await
            .unwrap();
        assert_eq!(outcome, DockOutcome::Success);
        assert!(sim.is_on_charger());
        let commands = sim.commands();
        assert!(!commands.contains(&SimCommand::StartLookAround));
        assert!(commands.contains(&SimCommand::GoToCharger { distance_mm: 80.0 }));
        assert_eq!(commands.last(), Some(&SimCommand::BackupOntoCharger));
    }

    #[tokio::test(start_paused = true)]
    async fn alignment_ends_at_front_point_facing_charger() {
        let sim = Arc::new(SimRobot::new().with_known_charger(charger_pose()));
        let engine = docking(&sim);
        let charger = sim.charger().unwrap();
        engine.approach(&charger).await.unwrap();
        let result = engine.adjust(charger, true).await.unwrap();
        assert_eq!(result, Adjustment::Aligned);

        let pose = sim.pose();
        let target = charger.front_point(40.0);
        assert!(pose.position.distance_to(&target) < 1e-6);
        assert!(minimal_turn(pose.heading_rad - charger.pose.heading_rad).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn charger_in_view_is_found_by_look_around() {
        let sim = Arc::new(
            SimRobot::new()
                .with_charger_at(charger_pose())
                .with_charger_in_view(),
        );
        let outcome = docking(&sim)
            .dock(true, &mut Randomness::new(3))
            .await
            .unwrap();
        assert_eq!(outcome, DockOutcome::Success);
        let commands = sim.commands();
        let look = commands
            .iter()
            .position(|c| *c == SimCommand::StartLookAround)
            .unwrap();
        let approach = commands
            .iter()
            .position(|c| matches!(c, SimCommand::GoToCharger { .. }))
            .unwrap();
        assert!(look < approach);
    }

    #[tokio::test(start_paused = true)]
    async fn random_search_finds_charger_after_moves() {
        let sim = Arc::new(SimRobot::new().with_charger_at(charger_pose()));
        sim.reveal_charger_after_moves(2);
        let outcome = docking(&sim)
            .dock(true, &mut Randomness::new(4))
            .await
            .unwrap();
        assert_eq!(outcome, DockOutcome::Success);

        let moves: Vec<_> = sim
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                SimCommand::GoToRelativePose {
                    dx_mm,
                    dy_mm,
                    dheading_rad,
                } => Some((dx_mm, dy_mm, dheading_rad)),
                _ => None,
            })
            .collect();
        assert_eq!(moves.len(), 2);
        for (dx, dy, dh) in moves {
            assert_eq!(dx.abs(), 150.0);
            assert_eq!(dy.abs(), 150.0);
            assert!(
                [-40.0_f64, 0.0, 40.0]
                    .iter()
                    .any(|d| (d.to_radians() - dh).abs() < 1e-9)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unseen_charger_is_not_found() {
        let sim = Arc::new(SimRobot::new().with_charger_at(charger_pose()));
        let outcome = docking(&sim)
            .dock(true, &mut Randomness::new(5))
            .await
            .unwrap();
        assert_eq!(outcome, DockOutcome::NotFound);
        let scans = sim
            .commands()
            .iter()
            .filter(|c| **c == SimCommand::StartLookAround)
            .count();
        assert_eq!(scans, 5);
        assert!(!sim.is_on_charger());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_backup_restarts_then_succeeds() {
        let sim = Arc::new(
            SimRobot::new()
                .with_known_charger(charger_pose())
                .with_charger_in_view(),
        );
        sim.script_dock_outcomes([false]);
        let outcome = docking(&sim)
            .dock(true, &mut Randomness::new(6))
            .await
            .unwrap();
        assert_eq!(outcome, DockOutcome::Success);
        assert!(sim.is_on_charger());

        let commands = sim.commands();
        assert!(commands.contains(&SimCommand::InvalidatePose));
        assert!(commands.contains(&SimCommand::InvalidateChargerPose));
        assert!(commands.contains(&SimCommand::DriveWheels {
            speed_mmps: 80.0,
            duration: Duration::from_secs(2)
        }));
        let backups = commands
            .iter()
            .filter(|c| **c == SimCommand::BackupOntoCharger)
            .count();
        assert_eq!(backups, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_are_bounded() {
        let sim = Arc::new(
            SimRobot::new()
                .with_known_charger(charger_pose())
                .with_charger_in_view(),
        );
        sim.script_dock_outcomes([false; 10]);
        let outcome = docking(&sim)
            .dock(true, &mut Randomness::new(7))
            .await
            .unwrap();
        assert_eq!(outcome, DockOutcome::Aborted);
        let backups = sim
            .commands()
            .iter()
            .filter(|c| **c == SimCommand::BackupOntoCharger)
            .count();
        // First try plus three restarts.
        assert_eq!(backups, 4);
        assert!(!sim.is_on_charger());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_localization_skips_geometry_and_searches_again() {
        let sim = Arc::new(
            SimRobot::new()
                .with_known_charger(charger_pose())
                .with_charger_in_view(),
        );
        sim.delocalize_on_next_approach();
        let outcome = docking(&sim)
            .dock(true, &mut Randomness::new(8))
            .await
            .unwrap();
        assert_eq!(outcome, DockOutcome::Success);

        let commands = sim.commands();
        let first_approach = commands
            .iter()
            .position(|c| matches!(c, SimCommand::GoToCharger { .. }))
            .unwrap();
        // The very next command is the search, not an adjustment turn.
        assert_eq!(commands[first_approach + 1], SimCommand::StartLookAround);
    }

    #[tokio::test(start_paused = true)]
    async fn undock_drives_clear_of_the_charger() {
        let sim = Arc::new(SimRobot::new().on_charger());
        docking(&sim).undock().await.unwrap();
        assert!(!sim.is_on_charger());
        assert_eq!(
            sim.commands(),
            vec![
                SimCommand::DriveOffCharger,
                SimCommand::DriveStraight {
                    distance_mm: 100.0,
                    speed_mmps: 100.0
                },
            ]
        );

        sim.clear_commands();
        docking(&sim).undock().await.unwrap();
        assert!(sim.commands().is_empty());
    }
}
