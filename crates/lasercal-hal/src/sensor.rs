//! `Sensor` trait: the measurement source read at every scan tick.
//!
//! The protocol is asynchronous and poll-based:
//!
//! 1. [`Sensor::begin_measuring`] opens a measurement window.
//! 2. [`Sensor::is_done`] is polled on later ticks until the window may close.
//! 3. [`Sensor::update`] returns the most recent snapshot and is called on
//!    every tick regardless of state.
//!
//! Snapshots are copied out; the caller never mutates sensor state through
//! them.

use lasercal_types::CalError;

/// A measurement source with a fixed-width snapshot.
pub trait Sensor: Send {
    /// Stable identifier for this sensor, e.g. `"camera"`.
    fn id(&self) -> &str;

    /// Column names for the values returned by [`update`][Self::update].
    /// The snapshot length always equals `headers().len()`.
    fn headers(&self) -> Vec<String>;

    /// Open a measurement window.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] when the sensor cannot start
    /// sampling.
    fn begin_measuring(&mut self) -> Result<(), CalError> {
        Ok(())
    }

    /// Whether the current measurement window may close.
    fn is_done(&self) -> bool {
        true
    }

    /// The most recent snapshot.  May return the same values across calls if
    /// nothing new has been measured.
    fn update(&mut self) -> Vec<f64>;
}
