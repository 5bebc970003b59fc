//! `pebble-runtime` – the companion's behaviour engine.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`]: the prioritized reactive tick that
//!   dispatches charging, inbound commands, face, pickup, cliff and object
//!   reactions, and publishes lifecycle status.
//! - [`companion`] – [`Companion`]: idle mode, needs levels, the charge and
//!   sleep routines, cue animations, speech and image display.
//! - [`docking`] – [`Docking`]: find the charger, line up in front of it and
//!   back onto the contacts, with bounded restarts.
//! - [`dispatcher`] – decoding of inbound notifications into commands and the
//!   weather announcement.
//! - [`messages`] – randomized spoken lines.
//! - [`observation`] – [`ObservationMemory`][observation::ObservationMemory]:
//!   per-entity reaction cooldowns.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: logging set-up
//!   with optional OTLP span export.

pub mod companion;
pub mod control_loop;
pub mod dispatcher;
pub mod docking;
pub mod messages;
pub mod observation;
pub mod telemetry;

pub use companion::{Companion, CompanionConfig, SleepTask};
pub use control_loop::{ControlLoop, ControlLoopConfig, Reaction};
pub use dispatcher::{Command, WeatherNotice};
pub use docking::{DockOutcome, Docking, DockingConfig};
pub use telemetry::{LogFormat, LogSettings, TracerProviderGuard, init_tracing};
