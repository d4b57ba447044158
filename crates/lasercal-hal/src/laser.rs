//! Laser source driven by a square-wave signal generator.
//!
//! The laser diode is modulated by the generator's square output.  Drive
//! power is set through the DC offset, the modulation rate through the
//! frequency, and "off" is an offset low enough that the diode never
//! conducts.  One [`LaserSource`] is typically shared by three consumers:
//!
//! - [`LaserOutput`] – the scan's on/off output,
//! - [`LaserPowerDriver`] – an axis over normalised power `0.0..=1.0`,
//! - [`LaserFrequencyDriver`] – an axis over modulation frequency in Hz.
//!
//! Dropping the source forces the generator back to the off level.

use std::sync::{Arc, Mutex, MutexGuard};

use lasercal_types::CalError;
use tracing::{debug, warn};

use crate::axis::AxisDriver;
use crate::output::OutputDevice;

/// Offset (V) at which the diode is fully off.
pub const OFF_SIGNAL: f64 = -0.7;
/// Peak-to-peak amplitude (V) of the modulation waveform.
pub const SQUARE_AMPLITUDE: f64 = 1.1;

/// An arbitrary function generator channel.
pub trait SignalGenerator: Send {
    fn id(&self) -> &str;

    /// Switch the generator's output stage.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] if the instrument rejects the
    /// command.
    fn set_output(&mut self, on: bool) -> Result<(), CalError>;

    /// Emit a square wave with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] if the instrument rejects the
    /// command.
    fn apply_square(
        &mut self,
        frequency_hz: f64,
        amplitude: f64,
        offset: f64,
    ) -> Result<(), CalError>;
}

/// Laser state plus the generator that realises it.
pub struct LaserSource {
    generator: Box<dyn SignalGenerator>,
    enabled: bool,
    frequency_hz: f64,
    offset: f64,
}

/// Handle shared between the laser's output and axis drivers.
pub type SharedLaser = Arc<Mutex<LaserSource>>;

impl LaserSource {
    /// Take control of `generator`, switch its output on and drive the
    /// laser to the off level.
    ///
    /// # Errors
    ///
    /// Propagates generator failures.
    pub fn new(mut generator: Box<dyn SignalGenerator>) -> Result<Self, CalError> {
        generator.set_output(true)?;
        let mut laser = Self {
            generator,
            enabled: false,
            frequency_hz: 1.0,
            offset: OFF_SIGNAL,
        };
        laser.apply()?;
        Ok(laser)
    }

    /// Wrap in the shared handle used by [`LaserOutput`] and the axis drivers.
    pub fn shared(self) -> SharedLaser {
        Arc::new(Mutex::new(self))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn frequency(&self) -> f64 {
        self.frequency_hz
    }

    /// Offset used while enabled.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), CalError> {
        self.enabled = enabled;
        self.apply()
    }

    /// Set drive power as a fraction of full scale.  `0.0` sits at the off
    /// level, `1.0` at zero offset.
    pub fn set_power(&mut self, power: f64) -> Result<(), CalError> {
        self.offset = power * -OFF_SIGNAL + OFF_SIGNAL;
        self.apply()
    }

    pub fn set_frequency(&mut self, frequency_hz: f64) -> Result<(), CalError> {
        self.frequency_hz = frequency_hz;
        self.apply()
    }

    fn apply(&mut self) -> Result<(), CalError> {
        let offset = if self.enabled { self.offset } else { OFF_SIGNAL };
        debug!(
            generator = %self.generator.id(),
            frequency_hz = self.frequency_hz,
            offset,
            "applying square wave"
        );
        self.generator
            .apply_square(self.frequency_hz, SQUARE_AMPLITUDE, offset)
    }
}

impl Drop for LaserSource {
    fn drop(&mut self) {
        self.enabled = false;
        self.offset = OFF_SIGNAL;
        if let Err(e) = self.apply() {
            warn!(generator = %self.generator.id(), error = %e, "failed to switch laser off on drop");
        }
    }
}

fn lock(laser: &SharedLaser) -> Result<MutexGuard<'_, LaserSource>, CalError> {
    laser
        .lock()
        .map_err(|_| CalError::hardware("laser", "laser state lock poisoned"))
}

// ────────────────────────────────────────────────────────────────────────────
// Output and axis adapters
// ────────────────────────────────────────────────────────────────────────────

/// The laser enable line as an [`OutputDevice`].
pub struct LaserOutput {
    id: String,
    laser: SharedLaser,
    enabled: bool,
}

impl LaserOutput {
    pub fn new(id: impl Into<String>, laser: SharedLaser) -> Self {
        Self {
            id: id.into(),
            laser,
            enabled: false,
        }
    }
}

impl OutputDevice for LaserOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), CalError> {
        lock(&self.laser)?.set_enabled(enabled)?;
        self.enabled = enabled;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Normalised laser power as an axis.
pub struct LaserPowerDriver {
    id: String,
    laser: SharedLaser,
}

impl LaserPowerDriver {
    pub fn new(id: impl Into<String>, laser: SharedLaser) -> Self {
        Self {
            id: id.into(),
            laser,
        }
    }
}

impl AxisDriver for LaserPowerDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn write_value(&mut self, value: f64) -> Result<(), CalError> {
        debug!(laser = %self.id, power = value, "setting laser power");
        lock(&self.laser)?.set_power(value)
    }
}

/// Laser modulation frequency as an axis.
pub struct LaserFrequencyDriver {
    id: String,
    laser: SharedLaser,
}

impl LaserFrequencyDriver {
    pub fn new(id: impl Into<String>, laser: SharedLaser) -> Self {
        Self {
            id: id.into(),
            laser,
        }
    }
}

impl AxisDriver for LaserFrequencyDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn write_value(&mut self, value: f64) -> Result<(), CalError> {
        debug!(laser = %self.id, frequency_hz = value, "setting laser frequency");
        lock(&self.laser)?.set_frequency(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<(f64, f64, f64)>>>;

    struct MockGenerator {
        output: Arc<Mutex<bool>>,
        log: Log,
    }

    fn laser() -> (SharedLaser, Log, Arc<Mutex<bool>>) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let output = Arc::new(Mutex::new(false));
        let generator = Box::new(MockGenerator {
            output: Arc::clone(&output),
            log: Arc::clone(&log),
        });
        (LaserSource::new(generator).unwrap().shared(), log, output)
    }

    impl SignalGenerator for MockGenerator {
        fn id(&self) -> &str {
            "afg"
        }

        fn set_output(&mut self, on: bool) -> Result<(), CalError> {
            *self.output.lock().unwrap() = on;
            Ok(())
        }

        fn apply_square(&mut self, f: f64, a: f64, o: f64) -> Result<(), CalError> {
            self.log.lock().unwrap().push((f, a, o));
            Ok(())
        }
    }

    fn last(log: &Log) -> (f64, f64, f64) {
        *log.lock().unwrap().last().unwrap()
    }

    #[test]
    fn new_source_starts_off() {
        let (_laser, log, output) = laser();
        assert!(*output.lock().unwrap());
        assert_eq!(last(&log), (1.0, SQUARE_AMPLITUDE, OFF_SIGNAL));
    }

    #[test]
    fn power_only_reaches_generator_when_enabled() {
        let (laser, log, _) = laser();
        let mut power = LaserPowerDriver::new("laser", Arc::clone(&laser));
        let mut output = LaserOutput::new("laser", Arc::clone(&laser));

        power.write_value(0.5).unwrap();
        assert_eq!(last(&log).2, OFF_SIGNAL);

        output.set_enabled(true).unwrap();
        assert!(output.is_enabled());
        assert!((last(&log).2 - -0.35).abs() < 1e-12);

        power.write_value(1.0).unwrap();
        assert!(last(&log).2.abs() < 1e-12);

        output.set_enabled(false).unwrap();
        assert_eq!(last(&log).2, OFF_SIGNAL);
    }

    #[test]
    fn frequency_axis_sets_modulation() {
        let (laser, log, _) = laser();
        let mut freq = LaserFrequencyDriver::new("laser", Arc::clone(&laser));
        freq.write_value(250.0).unwrap();
        assert_eq!(last(&log).0, 250.0);
        assert_eq!(laser.lock().unwrap().frequency(), 250.0);
    }

    #[test]
    fn dropping_the_source_turns_laser_off() {
        let (laser, log, _) = laser();
        {
            let mut l = laser.lock().unwrap();
            l.set_power(1.0).unwrap();
            l.set_enabled(true).unwrap();
        }
        assert!(last(&log).2.abs() < 1e-12);
        drop(laser);
        assert_eq!(last(&log).2, OFF_SIGNAL);
    }
}
