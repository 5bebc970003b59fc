//! [`ControlLoop`] – the reactive heart of Pebble.
//!
//! Every tick (100 ms by default) the loop looks at the robot and dispatches
//! at most one behaviour, in strict priority order:
//!
//! 1. **Low battery** – the full charge cycle.  Preempts everything else.
//! 2. **Inbound queue** – every queued notification is processed.
//! 3. **Face** – greet a face that is new or has not been seen for a minute.
//! 4. **Picked up** – react, then hold until put down.
//! 5. **Cliff** – back off, react, then hold until the cliff clears.
//! 6. **Object** – comment on an object that is new or unseen for five
//!    minutes.
//!
//! Idle (free-play) mode is suspended for the duration of every behaviour and
//! resumed afterwards.  A behaviour that fails because the robot is busy is
//! logged and the loop carries on; any other failure ends the loop and runs
//! the shutdown sequence.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pebble_hal::SimRobot;
//! use pebble_middleware::{InboundQueue, LoopbackChannel};
//! use pebble_runtime::{ControlLoop, ControlLoopConfig};
//!
//! # async fn demo() -> Result<(), pebble_types::PebbleError> {
//! let (sender, inbound) = InboundQueue::new();
//! let channel = Arc::new(LoopbackChannel::new(sender));
//! let robot = Arc::new(SimRobot::new());
//! let control = ControlLoop::new(robot, Some(channel), inbound, ControlLoopConfig::default());
//! control.run().await
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pebble_hal::{Randomness, Robot};
use pebble_middleware::{InboundQueue, NotificationChannel, Topics, publish_status};
use pebble_types::{
    Affect, EntityId, Face, LifecycleState, ObservedObject, PebbleError, StatusReport,
};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::companion::{Companion, CompanionConfig, SleepTask};
use crate::dispatcher::{self, Command};
use crate::docking::{DockOutcome, DockingConfig};
use crate::messages::{MessageKind, render};
use crate::observation::{ObservationMemory, Sighting};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    pub tick: Duration,
    pub face_cooldown: Duration,
    pub object_cooldown: Duration,
    /// Seed for every random choice; 0 draws from OS entropy.
    pub seed: u64,
    pub topics: Topics,
    pub companion: CompanionConfig,
    pub docking: DockingConfig,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            face_cooldown: Duration::from_secs(60),
            object_cooldown: Duration::from_secs(300),
            seed: 0,
            topics: Topics::default(),
            companion: CompanionConfig::default(),
            docking: DockingConfig::default(),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Idle,
    ChargeCycle,
    /// Number of inbound notifications processed.
    Inbound(usize),
    Face(EntityId),
    PickedUp,
    Cliff,
    Object(EntityId),
    /// The robot connection dropped; the loop must stop.
    ConnectionLost,
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop {
    robot: Arc<dyn Robot>,
    companion: Arc<Companion>,
    channel: Option<Arc<dyn NotificationChannel>>,
    inbound: InboundQueue,
    memory: ObservationMemory,
    state: LifecycleState,
    rng: Randomness,
    sleep_task: Option<SleepTask>,
    connection_lost: Arc<AtomicBool>,
    tick: Duration,
    topics: Topics,
}

impl ControlLoop {
    pub fn new(
        robot: Arc<dyn Robot>,
        channel: Option<Arc<dyn NotificationChannel>>,
        inbound: InboundQueue,
        config: ControlLoopConfig,
    ) -> Self {
        let companion = Arc::new(Companion::new(
            Arc::clone(&robot),
            config.companion,
            config.docking,
        ));
        Self {
            robot,
            companion,
            channel,
            inbound,
            memory: ObservationMemory::new(config.face_cooldown, config.object_cooldown),
            state: LifecycleState::Disconnected,
            rng: Randomness::new(config.seed),
            sleep_task: None,
            connection_lost: Arc::new(AtomicBool::new(false)),
            tick: config.tick,
            topics: config.topics,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn companion(&self) -> &Arc<Companion> {
        &self.companion
    }

    /// `true` while a sleep task spawned by a `sleep` command is running.
    pub fn is_sleep_task_active(&self) -> bool {
        self.sleep_task.as_ref().is_some_and(SleepTask::is_active)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Initialise, tick until the connection drops or a fatal error occurs,
    /// then shut down.
    pub async fn run(mut self) -> Result<(), PebbleError> {
        if let Err(e) = self.initialize().await {
            error!(error = %e, "initialisation failed");
            self.terminate().await;
            return Err(e);
        }

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let result = loop {
            interval.tick().await;
            match self.tick().await {
                Ok(_) if self.state.is_terminal() => break Ok(()),
                Ok(reaction) => {
                    if reaction != Reaction::Idle {
                        debug!(?reaction, "tick");
                    }
                }
                Err(e) => {
                    error!(error = %e, "control loop stopped");
                    break Err(e);
                }
            }
        };

        self.terminate().await;
        result
    }

    /// Register for connection loss, get ready to roam and start idling.
    pub async fn initialize(&mut self) -> Result<(), PebbleError> {
        let flag = Arc::clone(&self.connection_lost);
        self.robot.on_connection_lost(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        }));

        let (_, undocked) = tokio::join!(self.companion.connect_cubes(), self.companion.undock());
        undocked?;

        if let Some(channel) = &self.channel {
            channel.connect().await?;
        }
        self.set_state(LifecycleState::Connected).await;
        self.start_freetime().await;
        info!("control loop ready");
        Ok(())
    }

    /// Disconnect the channel and, if the robot is still there, send it
    /// home.  Failures are logged; shutdown always completes.
    pub async fn terminate(&mut self) {
        info!("terminating");
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.disconnect().await {
                warn!(error = %e, "channel disconnect failed");
            }
        }
        if let Some(task) = self.sleep_task.take() {
            task.cancel().await;
        }
        if !self.robot.is_connected() {
            return;
        }
        info!("sending the robot back to its charger");
        self.companion.stop_all_actions().await;
        self.companion.back_to_normal();
        match self.companion.dock(&mut self.rng).await {
            Ok(outcome) => info!(?outcome, "shutdown docking finished"),
            Err(e) => warn!(error = %e, "shutdown docking failed"),
        }
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Run one tick and report which behaviour, if any, was dispatched.
    pub async fn tick(&mut self) -> Result<Reaction, PebbleError> {
        if self.connection_lost.load(Ordering::SeqCst) || !self.robot.is_connected() {
            warn!("robot connection lost");
            self.set_state(LifecycleState::ConnectionLost).await;
            return Ok(Reaction::ConnectionLost);
        }

        let now = Instant::now();
        self.memory.sweep(now);
        if self.sleep_task.as_ref().is_some_and(|t| !t.is_active()) {
            debug!("sleep task finished");
            self.sleep_task = None;
            if !self.companion.is_sleeping() {
                self.start_freetime().await;
            }
        }
        self.companion.update_needs(None);

        let sleeping = self.companion.is_sleeping() || self.is_sleep_task_active();

        // 1. Low battery.
        if !sleeping && self.companion.needs_charging() {
            self.suspend_idle();
            let result = self.charge_cycle().await;
            self.finish(result).await?;
            return Ok(Reaction::ChargeCycle);
        }

        // 2. Inbound notifications, including any that arrive meanwhile.
        if !self.inbound.is_empty() {
            let mut count = 0;
            while !self.inbound.is_empty() {
                let messages = self.inbound.drain();
                info!(count = messages.len(), "processing inbound notifications");
                for message in messages {
                    count += 1;
                    if let Some(command) = dispatcher::decode(&message, &self.topics) {
                        self.execute(command).await?;
                    }
                }
            }
            return Ok(Reaction::Inbound(count));
        }

        // A sleeping robot only listens for commands.
        if sleeping {
            return Ok(Reaction::Idle);
        }

        // 3. Faces.
        if let Some(face) = self.eligible_face(now) {
            let id = face.id;
            self.suspend_idle();
            let result = self.on_saw_face(face, now).await;
            self.finish(result).await?;
            return Ok(Reaction::Face(id));
        }

        // 4. Picked up.
        if self.robot.is_picked_up() {
            self.suspend_idle();
            let result = self.on_picked_up().await;
            self.finish(result).await?;
            return Ok(Reaction::PickedUp);
        }

        // 5. Cliff.
        if self.robot.is_cliff_detected() {
            self.suspend_idle();
            let result = self.on_cliff().await;
            self.finish(result).await?;
            return Ok(Reaction::Cliff);
        }

        // 6. Objects.
        if let Some(object) = self.eligible_object(now) {
            let id = object.id;
            self.suspend_idle();
            let result = self.on_object_appeared(object, now).await;
            self.finish(result).await?;
            return Ok(Reaction::Object(id));
        }

        Ok(Reaction::Idle)
    }

    fn eligible_face(&self, now: Instant) -> Option<Face> {
        self.robot
            .visible_faces()
            .into_iter()
            .find(|f| self.memory.should_react(Sighting::Face(f.id), now))
    }

    fn eligible_object(&self, now: Instant) -> Option<ObservedObject> {
        self.robot
            .visible_objects()
            .into_iter()
            .find(|o| self.memory.should_react(Sighting::Object(o.id), now))
    }

    // -------------------------------------------------------------------------
    // Reaction plumbing
    // -------------------------------------------------------------------------

    fn suspend_idle(&self) {
        self.companion.stop_freetime();
    }

    /// Close out a behaviour: resume idling unless asleep, swallow "busy".
    async fn finish(&mut self, result: Result<(), PebbleError>) -> Result<(), PebbleError> {
        match result {
            Ok(()) => {}
            Err(PebbleError::RobotBusy(details)) => {
                warn!(details = %details, "robot busy, reaction skipped");
            }
            Err(e) => return Err(e),
        }
        if !self.companion.is_sleeping() && !self.is_sleep_task_active() {
            self.start_freetime().await;
        }
        Ok(())
    }

    async fn start_freetime(&mut self) {
        self.companion.start_freetime();
        self.set_state(LifecycleState::Freetime).await;
    }

    /// Record the new state and publish it when it changed.
    async fn set_state(&mut self, state: LifecycleState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "state change");
        self.state = state;
        let Some(channel) = &self.channel else {
            return;
        };
        let report = StatusReport::new(state, Some(self.robot.battery_voltage()));
        if let Err(e) = publish_status(channel.as_ref(), &self.topics, &report).await {
            warn!(error = %e, "status publish failed");
        }
    }

    async fn hold_while(&self, condition: impl Fn(&dyn Robot) -> bool) {
        while condition(self.robot.as_ref()) && !self.connection_lost.load(Ordering::SeqCst) {
            tokio::time::sleep(self.tick).await;
        }
    }

    fn visible_face(&self) -> Option<Face> {
        self.robot.visible_faces().into_iter().next()
    }

    // -------------------------------------------------------------------------
    // Behaviours
    // -------------------------------------------------------------------------

    async fn charge_cycle(&mut self) -> Result<(), PebbleError> {
        self.set_state(LifecycleState::GoingToCharge).await;
        info!(
            battery_voltage = self.companion.battery_voltage(),
            "battery low, going to charge"
        );
        let outcome = self.companion.start_charging_routine(&mut self.rng).await?;
        if outcome == DockOutcome::Success {
            self.set_state(LifecycleState::Charging).await;
            self.companion.charge_to_full(&mut self.rng).await?;
        } else {
            warn!(?outcome, "charging skipped");
        }
        self.companion.wake_up().await
    }

    async fn execute(&mut self, command: Command) -> Result<(), PebbleError> {
        match command {
            Command::Sleep => {
                if self.is_sleep_task_active() {
                    debug!("already going to sleep");
                    return Ok(());
                }
                self.suspend_idle();
                info!("going to sleep");
                self.sleep_task = Some(self.companion.spawn_sleep(self.rng.fork()));
                self.set_state(LifecycleState::Sleeping).await;
                Ok(())
            }
            Command::Freetime => {
                if let Some(task) = self.sleep_task.take() {
                    task.cancel().await;
                }
                self.suspend_idle();
                let result = self.companion.wake_up().await;
                self.finish(result).await
            }
            Command::Weather(notice) => {
                self.suspend_idle();
                self.set_state(LifecycleState::Announcing).await;
                let result = dispatcher::announce(&self.companion, &notice, &mut self.rng).await;
                self.finish(result).await
            }
        }
    }

    async fn on_saw_face(&mut self, face: Face, now: Instant) -> Result<(), PebbleError> {
        self.memory.record(Sighting::Face(face.id), now);
        self.set_state(LifecycleState::SawFace).await;
        info!(face = face.id, name = ?face.name, "saw face");

        if face.name.is_none() {
            let message = render(MessageKind::Unrecognized, Some(&face), &mut self.rng);
            return self.companion.say(&message).await;
        }

        self.companion.turn_toward_face(&face).await?;
        let greeting = render(MessageKind::Greeting, Some(&face), &mut self.rng);
        self.companion.cue(Affect::Positive, &mut self.rng).await?;
        self.companion.say(&greeting).await?;
        if let Some(expression) = face.expression {
            let remark = render(MessageKind::Expression(expression), Some(&face), &mut self.rng);
            self.companion.say(&remark).await?;
        }
        Ok(())
    }

    async fn on_picked_up(&mut self) -> Result<(), PebbleError> {
        info!("picked up");
        self.set_state(LifecycleState::PickedUp).await;
        let face = self.visible_face();
        let message = render(MessageKind::PickedUp, face.as_ref(), &mut self.rng);
        self.companion.cue(Affect::Positive, &mut self.rng).await?;
        if face.is_some() {
            self.companion.show_camera_image().await?;
        }
        self.companion.say(&message).await?;
        self.hold_while(|robot| robot.is_picked_up()).await;
        info!("put down");
        Ok(())
    }

    async fn on_cliff(&mut self) -> Result<(), PebbleError> {
        info!("cliff detected");
        self.set_state(LifecycleState::OnCliff).await;
        self.robot.stop_all_motors();
        self.robot.abort_all_actions();
        self.robot.clear_idle_animation();
        self.robot
            .drive_wheels(-40.0, Duration::from_secs(1))
            .await?;
        let face = self.visible_face();
        let message = render(MessageKind::CliffDetected, face.as_ref(), &mut self.rng);
        self.companion.cue(Affect::Negative, &mut self.rng).await?;
        self.companion.say(&message).await?;
        self.hold_while(|robot| robot.is_cliff_detected()).await;
        info!("away from cliff");
        Ok(())
    }

    async fn on_object_appeared(
        &mut self,
        object: ObservedObject,
        now: Instant,
    ) -> Result<(), PebbleError> {
        self.memory.record(Sighting::Object(object.id), now);
        info!(object = object.id, kind = ?object.kind, "object appeared");
        let face = self.visible_face();
        let message = render(
            MessageKind::ObjectAppeared(object.kind),
            face.as_ref(),
            &mut self.rng,
        );
        self.companion.say(&message).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pebble_hal::{SimCommand, SimRobot};
    use pebble_middleware::{InboundSender, LoopbackChannel};
    use pebble_types::{Animation, ObjectKind, Pose};
    use serde_json::json;

    struct Harness {
        sim: Arc<SimRobot>,
        channel: Arc<LoopbackChannel>,
        control: ControlLoop,
        _sender: InboundSender,
    }

    impl Harness {
        async fn new(sim: SimRobot) -> Self {
            let sim = Arc::new(sim);
            let (sender, inbound) = InboundQueue::new();
            let channel = Arc::new(LoopbackChannel::new(sender.clone()));
            let config = ControlLoopConfig {
                seed: 42,
                ..ControlLoopConfig::default()
            };
            let mut control = ControlLoop::new(
                sim.clone(),
                Some(channel.clone() as Arc<dyn NotificationChannel>),
                inbound,
                config,
            );
            control.initialize().await.unwrap();
            sim.clear_commands();
            Self {
                sim,
                channel,
                control,
                _sender: sender,
            }
        }

        fn statuses(&self) -> Vec<String> {
            self.channel
                .published()
                .into_iter()
                .filter(|p| p.topic == "cozmo/status")
                .filter_map(|p| p.payload["status"].as_str().map(str::to_string))
                .collect()
        }

        fn control_msg(&self, msg: &str) {
            let payload = json!({ "msg": msg }).to_string();
            assert!(
                self.channel
                    .inject("home-assistant/cozmo/control", payload.as_bytes())
            );
        }
    }

    fn charger() -> Pose {
        Pose::new(300.0, -80.0, 0.0, 1.2, 0)
    }

    #[tokio::test(start_paused = true)]
    async fn startup_undocks_and_reports_freetime() {
        let h = Harness::new(SimRobot::new().on_charger()).await;
        assert!(!h.sim.is_on_charger());
        assert!(h.sim.cubes_connected());
        assert!(h.sim.freeplay_active());
        assert_eq!(h.control.state(), LifecycleState::Freetime);
        assert_eq!(h.statuses(), vec!["Connected", "Freetime"]);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_tick_does_nothing() {
        let mut h = Harness::new(SimRobot::new()).await;
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Idle);
        assert!(h.sim.spoken().is_empty());
        assert!(h.sim.freeplay_active());
    }

    #[tokio::test(start_paused = true)]
    async fn face_greeting_respects_cooldown() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.set_visible_faces(vec![Face::named(1, "Alice")]);

        assert_eq!(h.control.tick().await.unwrap(), Reaction::Face(1));
        assert_eq!(h.sim.spoken().len(), 1);
        assert!(h.sim.spoken()[0].contains("Alice"));
        assert!(h.sim.freeplay_active());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Idle);
        assert_eq!(h.sim.spoken().len(), 1);

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Face(1));
        assert_eq!(h.sim.spoken().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn face_with_expression_gets_a_remark() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.set_visible_faces(vec![
            Face::named(2, "Bob").with_expression(pebble_types::Expression::Happy),
        ]);
        h.control.tick().await.unwrap();
        assert_eq!(h.sim.spoken().len(), 2);
        assert!(h.sim.commands().contains(&SimCommand::TurnTowardsFace(2)));
        assert!(h.statuses().contains(&"Saw face".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn stranger_is_not_turned_towards() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.set_visible_faces(vec![Face::stranger(9)]);
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Face(9));
        assert_eq!(h.sim.spoken().len(), 1);
        assert!(!h.sim.commands().contains(&SimCommand::TurnTowardsFace(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn low_battery_preempts_face() {
        let mut h = Harness::new(
            SimRobot::new()
                .with_known_charger(charger())
                .with_charge_duration(Duration::from_secs(45)),
        )
        .await;
        h.sim.set_battery(3.3);
        h.sim.set_visible_faces(vec![Face::named(1, "Alice")]);

        assert_eq!(h.control.tick().await.unwrap(), Reaction::ChargeCycle);
        assert!(h.sim.spoken().is_empty());
        let statuses = h.statuses();
        let going = statuses.iter().position(|s| s == "Going to charge").unwrap();
        let charging = statuses.iter().position(|s| s == "Charging").unwrap();
        assert!(going < charging);
        assert_eq!(statuses.last().map(String::as_str), Some("Freetime"));

        let commands = h.sim.commands();
        assert!(commands.contains(&SimCommand::Animation(Animation::GoToSleepGetIn)));
        assert!(commands.contains(&SimCommand::BackupOntoCharger));
        assert!(commands.contains(&SimCommand::DriveOffCharger));
        assert!(!h.sim.is_on_charger());
        assert!(h.sim.freeplay_active());

        // The face waits for the next tick.
        h.sim.set_battery(4.1);
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Face(1));
    }

    #[tokio::test(start_paused = true)]
    async fn picked_up_holds_until_put_down() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.set_picked_up(true);
        let sim = h.sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            sim.set_picked_up(false);
        });
        let start = Instant::now();
        assert_eq!(h.control.tick().await.unwrap(), Reaction::PickedUp);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(h.sim.spoken().len(), 1);
        assert!(h.statuses().contains(&"Picked up".to_string()));
        assert_eq!(h.control.state(), LifecycleState::Freetime);
    }

    #[tokio::test(start_paused = true)]
    async fn picked_up_with_face_shows_camera_image() {
        let mut h = Harness::new(SimRobot::new()).await;
        // Remember the face so only the pickup triggers.
        h.sim.set_visible_faces(vec![Face::named(1, "Alice")]);
        h.control.tick().await.unwrap();
        h.sim.clear_commands();

        h.sim.set_picked_up(true);
        let sim = h.sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            sim.set_picked_up(false);
        });
        assert_eq!(h.control.tick().await.unwrap(), Reaction::PickedUp);
        assert!(
            h.sim
                .commands()
                .iter()
                .any(|c| matches!(c, SimCommand::DisplayImage { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cliff_backs_off_then_waits() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.set_cliff_detected(true);
        let sim = h.sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            sim.set_cliff_detected(false);
        });
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Cliff);
        let commands = h.sim.commands();
        let stop = commands
            .iter()
            .position(|c| *c == SimCommand::StopAllMotors)
            .unwrap();
        let reverse = commands
            .iter()
            .position(|c| {
                *c == SimCommand::DriveWheels {
                    speed_mmps: -40.0,
                    duration: Duration::from_secs(1),
                }
            })
            .unwrap();
        assert!(stop < reverse);
        assert!(commands.contains(&SimCommand::ClearIdleAnimation));
        assert_eq!(h.sim.spoken().len(), 1);
        assert!(h.statuses().contains(&"On cliff".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn object_cooldown_is_five_minutes() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.set_visible_objects(vec![ObservedObject {
            id: 5,
            kind: ObjectKind::Cube,
        }]);
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Object(5));
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Idle);
        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Object(5));
        assert_eq!(h.sim.spoken().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn face_outranks_pickup_and_object() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.set_visible_faces(vec![Face::stranger(3)]);
        h.sim.set_visible_objects(vec![ObservedObject {
            id: 8,
            kind: ObjectKind::Unknown,
        }]);
        h.sim.set_cliff_detected(true);
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Face(3));
        h.sim.set_cliff_detected(false);
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Object(8));
    }

    #[tokio::test(start_paused = true)]
    async fn weather_notification_is_announced() {
        let mut h = Harness::new(SimRobot::new()).await;
        assert!(h.channel.inject(
            "home-assistant/cozmo/notification",
            br#"{"msg":"clear skies today"}"#
        ));
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Inbound(1));
        assert_eq!(
            h.sim.spoken(),
            vec![
                dispatcher::WEATHER_LEAD_IN.to_string(),
                "clear skies today".to_string()
            ]
        );
        let statuses = h.statuses();
        assert_eq!(&statuses[statuses.len() - 2..], ["Anouncing", "Freetime"]);
        assert!(
            !h.sim
                .commands()
                .iter()
                .any(|c| matches!(c, SimCommand::DisplayImage { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn whole_queue_is_drained_in_one_tick() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.channel
            .inject("home-assistant/cozmo/notification", br#"{"msg":"windy"}"#);
        h.channel.inject("unknown/topic", br#"{"msg":"sleep"}"#);
        h.channel
            .inject("home-assistant/cozmo/notification", br#"{"msg":"rain"}"#);
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Inbound(3));
        assert_eq!(h.sim.spoken().len(), 4);
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn notification_arriving_mid_announcement_is_handled_same_tick() {
        use std::io::Write;

        let mut h = Harness::new(SimRobot::new()).await;
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(&[7, 7, 7]).unwrap();

        // Inject a second notice as soon as the announcement starts; the
        // image read gives the observer a chance to run.
        let mut observer = h.channel.subscribe_topic("cozmo/status");
        let channel = h.channel.clone();
        let late = tokio::spawn(async move {
            while let Some(published) = observer.recv().await {
                if published.payload["status"] == "Anouncing" {
                    return channel
                        .inject("home-assistant/cozmo/notification", br#"{"msg":"windy"}"#);
                }
            }
            false
        });

        let payload = json!({
            "msg": "clear skies today",
            "imagePath": image.path().to_string_lossy(),
        })
        .to_string();
        assert!(
            h.channel
                .inject("home-assistant/cozmo/notification", payload.as_bytes())
        );
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Inbound(2));
        assert!(late.await.unwrap());
        assert_eq!(
            h.sim.spoken(),
            vec![
                dispatcher::WEATHER_LEAD_IN.to_string(),
                "clear skies today".to_string(),
                dispatcher::WEATHER_LEAD_IN.to_string(),
                "windy".to_string(),
            ]
        );
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_weather_announcement_turns_lights_off() {
        let mut h = Harness::new(SimRobot::new()).await;
        assert!(h.channel.inject(
            "home-assistant/cozmo/notification",
            br#"{"msg":"clear skies today"}"#
        ));
        h.sim
            .fail_next_action(PebbleError::RobotBusy("animation".into()));
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Inbound(1));
        assert_eq!(h.sim.backpack_light(), None);
        assert_eq!(h.sim.cube_light(), None);
        assert!(h.sim.freeplay_active());
        assert_eq!(h.control.state(), LifecycleState::Freetime);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sleep_task_resumes_freetime() {
        let mut h = Harness::new(SimRobot::new().with_known_charger(charger())).await;
        h.control_msg("sleep");
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Inbound(1));
        assert_eq!(h.control.state(), LifecycleState::Sleeping);

        // The task's first animation fails and the task ends on its own.
        h.sim
            .fail_next_action(PebbleError::action("play_animation", "motor fault"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!h.control.is_sleep_task_active());
        assert!(!h.control.companion().is_sleeping());
        assert!(!h.sim.freeplay_active());

        assert_eq!(h.control.tick().await.unwrap(), Reaction::Idle);
        assert!(h.sim.freeplay_active());
        assert_eq!(h.control.state(), LifecycleState::Freetime);
        assert_eq!(h.statuses().last().map(String::as_str), Some("Freetime"));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_command_spawns_task_without_blocking() {
        let mut h = Harness::new(
            SimRobot::new()
                .with_known_charger(charger())
                .with_charge_duration(Duration::from_secs(3600)),
        )
        .await;
        h.control_msg("sleep");
        let start = Instant::now();
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Inbound(1));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(h.control.is_sleep_task_active());
        assert_eq!(h.control.state(), LifecycleState::Sleeping);
        assert!(!h.sim.freeplay_active());

        // Let the task dock.
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(h.sim.is_on_charger());
        assert!(h.control.companion().is_sleeping());

        // Low battery does not start a second charge cycle while asleep, and
        // faces are ignored.
        h.sim.set_battery(3.3);
        h.sim.set_visible_faces(vec![Face::named(1, "Alice")]);
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Idle);

        h.control_msg("freetime");
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Inbound(1));
        assert!(!h.control.is_sleep_task_active());
        assert!(!h.control.companion().is_sleeping());
        assert!(h.sim.freeplay_active());
        assert_eq!(h.control.state(), LifecycleState::Freetime);
        assert!(
            h.sim
                .commands()
                .contains(&SimCommand::Animation(Animation::WakeUp))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn busy_robot_is_logged_and_idle_resumes() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.set_visible_faces(vec![Face::stranger(4)]);
        h.sim
            .fail_next_action(PebbleError::RobotBusy("speaking".into()));
        assert_eq!(h.control.tick().await.unwrap(), Reaction::Face(4));
        assert!(h.sim.freeplay_active());
        assert_eq!(h.control.state(), LifecycleState::Freetime);
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_are_fatal() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.set_visible_faces(vec![Face::stranger(4)]);
        h.sim
            .fail_next_action(PebbleError::action("say_text", "speaker fault"));
        let err = h.control.tick().await.unwrap_err();
        assert!(matches!(err, PebbleError::ActionFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_ends_loop() {
        let mut h = Harness::new(SimRobot::new()).await;
        h.sim.drop_connection();
        assert_eq!(h.control.tick().await.unwrap(), Reaction::ConnectionLost);
        assert_eq!(h.control.state(), LifecycleState::ConnectionLost);
        assert_eq!(h.statuses().last().map(String::as_str), Some("Connection lost"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_shuts_down_after_connection_loss() {
        let sim = Arc::new(SimRobot::new());
        let (sender, inbound) = InboundQueue::new();
        let channel = Arc::new(LoopbackChannel::new(sender));
        let control = ControlLoop::new(
            sim.clone(),
            Some(channel.clone() as Arc<dyn NotificationChannel>),
            inbound,
            ControlLoopConfig::default(),
        );
        let dropper = sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            dropper.drop_connection();
        });
        control.run().await.unwrap();
        assert!(!channel.is_connected());
        // The robot is gone, so no homing attempt is made.
        assert!(!sim.commands().contains(&SimCommand::AbortAllActions));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_sends_robot_home() {
        let sim = Arc::new(SimRobot::new().with_known_charger(charger()));
        let (sender, inbound) = InboundQueue::new();
        let channel = Arc::new(LoopbackChannel::new(sender));
        let control = ControlLoop::new(
            sim.clone(),
            Some(channel.clone() as Arc<dyn NotificationChannel>),
            inbound,
            ControlLoopConfig::default(),
        );
        sim.set_visible_faces(vec![Face::stranger(6)]);
        sim.fail_next_action(PebbleError::action("say_text", "speaker fault"));
        let result = control.run().await;
        assert!(result.is_err());
        assert!(!channel.is_connected());
        assert!(sim.commands().contains(&SimCommand::AbortAllActions));
        assert!(sim.is_on_charger());
        assert!(!sim.freeplay_active());
    }
}
