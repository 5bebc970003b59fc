//! `pebble-hal` – the robot facade.
//!
//! # Modules
//!
//! - [`robot`] – [`Robot`]: the async sensor/actuator trait the controller
//!   talks to instead of the vendor SDK.
//! - [`camera`] – [`CameraFrame`]: head-camera frames.
//! - [`random`] – [`Randomness`]: seedable random source injected wherever
//!   behaviour is randomized.
//! - [`sim`] – [`SimRobot`][sim::SimRobot]: kinematic simulator for headless
//!   runs and tests.

pub mod camera;
pub mod random;
pub mod robot;
pub mod sim;

pub use camera::CameraFrame;
pub use random::Randomness;
pub use robot::{ConnectionLostCallback, Robot};
pub use sim::{SimCommand, SimRobot};
