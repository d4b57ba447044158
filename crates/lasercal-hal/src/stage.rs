//! Motorised stage drivers.
//!
//! A [`MotorStage`] is the controller-level handle (move, home, in-motion
//! flag).  [`StageDriver`] adapts it to [`AxisDriver`], converting axis values
//! to stage positions through a [`StageGeometry`]:
//!
//! | Geometry | Axis value | Stage position |
//! |---|---|---|
//! | [`StageGeometry::Linear`] | millimetres | millimetres |
//! | [`StageGeometry::Rotary`] | displacement on a target surface | stage angle in encoder units |
//!
//! Stages that report no completed homing are homed when the driver is
//! attached.  Targets written while homing is in progress are held back and
//! issued by [`AxisDriver::service`] once the homing move has finished.

use std::f64::consts::PI;

use lasercal_types::CalError;
use tracing::{info, warn};

use crate::axis::AxisDriver;

/// A motion controller channel driving one stage.
pub trait MotorStage: Send {
    /// Controller serial number or other stable identifier.
    fn serial(&self) -> &str;

    /// Start an absolute move to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] if the controller rejects the move.
    fn move_to(&mut self, position: f64) -> Result<(), CalError>;

    /// Start a homing move.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] if the controller rejects the move.
    fn move_home(&mut self) -> Result<(), CalError>;

    fn is_in_motion(&self) -> bool;

    /// Current stage position in controller units.
    fn position(&self) -> f64;

    fn has_been_homed(&self) -> bool;
}

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// Mounting geometry of a rotation stage aimed at a flat surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotaryGeometry {
    /// Perpendicular distance from the rotation axis to the surface.
    pub distance_to_surface: f64,
    /// Stage position at which the beam hits the surface perpendicularly.
    pub ticks_to_level: f64,
    /// Stage units per full revolution.
    pub ticks_per_revolution: f64,
}

impl Default for RotaryGeometry {
    fn default() -> Self {
        Self {
            distance_to_surface: 576.2625,
            ticks_to_level: 8.1,
            ticks_per_revolution: 66.0,
        }
    }
}

impl RotaryGeometry {
    /// Stage angle that puts the beam `distance` away from the level point.
    pub fn distance_to_angle(&self, distance: f64) -> f64 {
        self.ticks_to_level
            + (distance / self.distance_to_surface).atan() * self.ticks_per_revolution / (2.0 * PI)
    }

    /// Inverse of [`distance_to_angle`][Self::distance_to_angle].
    pub fn angle_to_distance(&self, angle: f64) -> f64 {
        self.distance_to_surface
            * ((angle - self.ticks_to_level) * (2.0 * PI) / self.ticks_per_revolution).tan()
    }
}

/// How axis values map onto stage positions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum StageGeometry {
    #[default]
    Linear,
    Rotary(RotaryGeometry),
}

impl StageGeometry {
    fn to_stage(self, value: f64) -> f64 {
        match self {
            StageGeometry::Linear => value,
            StageGeometry::Rotary(g) => g.distance_to_angle(value),
        }
    }

    fn to_axis(self, position: f64) -> f64 {
        match self {
            StageGeometry::Linear => position,
            StageGeometry::Rotary(g) => g.angle_to_distance(position),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StageDriver
// ────────────────────────────────────────────────────────────────────────────

/// [`AxisDriver`] for a [`MotorStage`].
pub struct StageDriver {
    stage: Box<dyn MotorStage>,
    geometry: StageGeometry,
    homing: bool,
    pending: Option<f64>,
}

impl StageDriver {
    /// Attach to `stage`, homing it first if the controller reports that
    /// homing has never completed.
    ///
    /// # Errors
    ///
    /// Propagates a rejected homing command.
    pub fn attach(stage: Box<dyn MotorStage>, geometry: StageGeometry) -> Result<Self, CalError> {
        let mut driver = Self {
            stage,
            geometry,
            homing: false,
            pending: None,
        };
        if !driver.stage.has_been_homed() {
            driver.start_homing()?;
        }
        Ok(driver)
    }

    /// Shorthand for a linear stage.
    pub fn linear(stage: Box<dyn MotorStage>) -> Result<Self, CalError> {
        Self::attach(stage, StageGeometry::Linear)
    }

    /// Shorthand for a rotation stage with the given geometry.
    pub fn rotary(stage: Box<dyn MotorStage>, geometry: RotaryGeometry) -> Result<Self, CalError> {
        Self::attach(stage, StageGeometry::Rotary(geometry))
    }

    /// Start a homing move.  Any target written before homing completes is
    /// issued afterwards.
    ///
    /// # Errors
    ///
    /// Propagates a rejected homing command.
    pub fn start_homing(&mut self) -> Result<(), CalError> {
        info!(stage = %self.stage.serial(), "homing stage");
        self.stage.move_home()?;
        self.homing = true;
        Ok(())
    }

    pub fn is_homing(&self) -> bool {
        self.homing
    }

    /// Current stage position expressed in axis units.
    pub fn measured_value(&self) -> f64 {
        self.geometry.to_axis(self.stage.position())
    }
}

impl AxisDriver for StageDriver {
    fn id(&self) -> &str {
        self.stage.serial()
    }

    fn write_value(&mut self, value: f64) -> Result<(), CalError> {
        if self.homing {
            self.pending = Some(value);
            return Ok(());
        }
        self.stage.move_to(self.geometry.to_stage(value))
    }

    fn is_done(&self) -> bool {
        !self.homing && !self.stage.is_in_motion()
    }

    fn service(&mut self) {
        if !self.homing || self.stage.is_in_motion() {
            return;
        }
        self.homing = false;
        if let Some(value) = self.pending.take() {
            let position = self.geometry.to_stage(value);
            if let Err(e) = self.stage.move_to(position) {
                warn!(stage = %self.stage.serial(), error = %e, "post-homing move failed");
            }
        }
    }
}
