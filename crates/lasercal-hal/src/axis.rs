//! Controllable axes.
//!
//! A driver implements [`AxisDriver`] to perform the physical write; the
//! [`Axis`] wrapper owns everything that must hold for every driver: the
//! clamp range, the current value and the ordered list of target points.
//! Because clamping lives in [`Axis::goto`], no driver can ever be commanded
//! outside `[min, max]`.

use lasercal_types::{AxisKind, CalError};
use tracing::{debug, warn};

/// Hardware side of an axis (stage controller, signal generator channel, …).
pub trait AxisDriver: Send {
    /// Stable identifier for this driver, e.g. a stage serial number.
    fn id(&self) -> &str;

    /// Write `value` to the device.  Motion may continue after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] when the device rejects the write.
    fn write_value(&mut self, value: f64) -> Result<(), CalError>;

    /// Non-blocking motion-complete poll.  Axes that do not move are always
    /// done.
    fn is_done(&self) -> bool {
        true
    }

    /// Called on every scan tick so drivers can advance background work such
    /// as homing.
    fn service(&mut self) {}
}

/// A named, clamped axis with a sequence of scan points.
pub struct Axis {
    name: String,
    kind: AxisKind,
    min: f64,
    max: f64,
    current_value: f64,
    points: Vec<f64>,
    driver: Box<dyn AxisDriver>,
}

impl std::fmt::Debug for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Axis")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("current_value", &self.current_value)
            .field("points", &self.points)
            .field("driver", &self.driver.id())
            .finish()
    }
}

impl Axis {
    /// Create an axis bound to `driver`.  The current value starts at `min`;
    /// nothing is written to the device until the first [`goto`][Self::goto].
    ///
    /// # Errors
    ///
    /// Returns [`CalError::InvalidBounds`] when `max < min` or either bound is
    /// not finite.
    pub fn new(
        name: impl Into<String>,
        kind: AxisKind,
        min: f64,
        max: f64,
        driver: Box<dyn AxisDriver>,
    ) -> Result<Self, CalError> {
        let name = name.into();
        validate_bounds(&name, min, max)?;
        Ok(Self {
            name,
            kind,
            min,
            max,
            current_value: min,
            points: Vec::new(),
            driver,
        })
    }

    /// Builder-style variant of [`set_points`][Self::set_points].
    pub fn with_points(mut self, points: Vec<f64>) -> Self {
        self.points = points;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AxisKind {
        self.kind
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// The last value commanded through [`goto`][Self::goto], after clamping.
    pub fn current_value(&self) -> f64 {
        self.current_value
    }

    pub fn driver_id(&self) -> &str {
        self.driver.id()
    }

    /// Replace the clamp range.
    ///
    /// The stored current value is re-clamped into the new range so the
    /// `min ≤ current_value ≤ max` invariant keeps holding; the device itself
    /// is not moved.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::InvalidBounds`] for inverted or non-finite bounds,
    /// leaving the previous range untouched.
    pub fn set_bounds(&mut self, min: f64, max: f64) -> Result<(), CalError> {
        validate_bounds(&self.name, min, max)?;
        self.min = min;
        self.max = max;
        self.current_value = self.current_value.clamp(min, max);
        Ok(())
    }

    /// Clip `value` to the axis range, store it, and write it to the driver.
    ///
    /// Returns once the write has been issued; use [`is_done`][Self::is_done]
    /// to poll for arrival.  The stored value is updated even when the write
    /// fails, mirroring what was commanded.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::Config`] for a NaN target and propagates driver
    /// failures.
    pub fn goto(&mut self, value: f64) -> Result<(), CalError> {
        if value.is_nan() {
            return Err(CalError::Config(format!(
                "axis '{}' cannot move to NaN",
                self.name
            )));
        }
        let clipped = value.clamp(self.min, self.max);
        if clipped != value {
            debug!(axis = %self.name, requested = value, clipped, "target clipped to bounds");
        }
        self.current_value = clipped;
        let result = self.driver.write_value(clipped);
        if let Err(ref e) = result {
            warn!(axis = %self.name, target = clipped, error = %e, "axis write failed");
        }
        result
    }

    /// Move to the scan point at `step`.
    ///
    /// Returns `None` when this axis has no point at `step`.
    pub fn goto_step(&mut self, step: usize) -> Option<Result<(), CalError>> {
        let target = self.point(step)?;
        Some(self.goto(target))
    }

    /// Convenience for `goto(0.0)`.
    pub fn home(&mut self) -> Result<(), CalError> {
        self.goto(0.0)
    }

    /// Non-blocking motion-complete poll.
    pub fn is_done(&self) -> bool {
        self.driver.is_done()
    }

    /// Give the driver a chance to advance background work.
    pub fn service(&mut self) {
        self.driver.service();
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Replace the scan points.  Points are consumed by index, one per step.
    pub fn set_points(&mut self, points: Vec<f64>) {
        self.points = points;
    }

    /// Point at `step`, if any.
    pub fn point(&self, step: usize) -> Option<f64> {
        self.points.get(step).copied()
    }

    /// `steps` evenly spaced points starting at `min`, each `(max - min) /
    /// steps` apart.  The last point stops one increment short of `max`.
    pub fn linspace(min: f64, max: f64, steps: usize) -> Vec<f64> {
        if steps == 0 {
            return Vec::new();
        }
        let per_step = (max - min) / steps as f64;
        (0..steps).map(|i| min + i as f64 * per_step).collect()
    }
}

fn validate_bounds(axis: &str, min: f64, max: f64) -> Result<(), CalError> {
    if !min.is_finite() || !max.is_finite() || max < min {
        return Err(CalError::InvalidBounds {
            axis: axis.to_string(),
            min,
            max,
        });
    }
    Ok(())
}
