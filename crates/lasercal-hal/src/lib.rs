//! `lasercal-hal` – capability interfaces and device drivers.
//!
//! The scan runtime only ever talks to the traits defined here, so physical
//! stages, laser sources, and cameras can be swapped without touching the
//! orchestration logic.
//!
//! # Modules
//!
//! - [`axis`] – [`AxisDriver`][axis::AxisDriver] trait plus the clamped
//!   [`Axis`][axis::Axis] that owns bounds, current value and target points.
//! - [`output`] – [`OutputDevice`][output::OutputDevice]: an on/off actuator.
//! - [`sensor`] – [`Sensor`][sensor::Sensor]: begin → poll-done → snapshot
//!   measurement protocol.
//! - [`camera`] – [`FrameSource`][camera::FrameSource]: raw frame acquisition
//!   with a cumulative timeout counter.
//! - [`stage`] – motorised stage drivers (linear and rotary geometry) with
//!   deferred homing.
//! - [`laser`] – [`LaserSource`][laser::LaserSource] driven by a square-wave
//!   signal generator, exposed as an output and as power/frequency axes.
//! - [`registry`] – [`DeviceRegistry`][registry::DeviceRegistry]: explicitly
//!   constructed, lifetime-scoped device registry.
//! - [`sim`] – simulated drivers and the [`SimRegistry`][sim::SimRegistry]
//!   builder for headless runs and tests.

pub mod axis;
pub mod camera;
pub mod laser;
pub mod output;
pub mod registry;
pub mod sensor;
pub mod sim;
pub mod stage;

pub use axis::{Axis, AxisDriver};
pub use camera::{Acquisition, FrameSource, RawFrame};
pub use laser::{
    LaserFrequencyDriver, LaserOutput, LaserPowerDriver, LaserSource, SharedLaser,
    SignalGenerator,
};
pub use output::OutputDevice;
pub use registry::{DeviceClass, DeviceInfo, DeviceRegistry};
pub use sensor::Sensor;
pub use stage::{MotorStage, RotaryGeometry, StageDriver, StageGeometry};
