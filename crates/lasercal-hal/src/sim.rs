//! Simulated drivers for headless runs and CI.
//!
//! [`SimRegistry`] builds a [`DeviceRegistry`] whose every slot is backed by
//! an in-process driver that records what it was asked to do.  This lets a
//! complete scan run end to end without stages, lasers, or a frame grabber.
//!
//! # Driver behaviour
//!
//! | Driver | Behaviour |
//! |---|---|
//! | [`SimAxisDriver`] | Logs every write; reports busy for `settle_ticks` service calls after each write. |
//! | [`SimOutput`] | Appends every state change to a shared history. |
//! | [`SimSensor`] | Returns a read counter in every column; done `done_after` updates after `begin_measuring`. |
//! | [`SimFrameSource`] | Renders a bright square on a dark background that blinks with a fixed period; can inject timeouts. |
//! | [`SimStage`] | Moves instantly but stays "in motion" for a few polls. |
//! | [`SimSignalGenerator`] | Records the last square wave applied. |
//!
//! # Example
//!
//! ```rust
//! use lasercal_hal::sim::SimRegistry;
//!
//! let mut registry = SimRegistry::builder()
//!     .with_axis("x", 0)
//!     .with_output("shutter")
//!     .with_sensor("counter", 2)
//!     .build()
//!     .unwrap();
//!
//! let mut shutter = registry.take_output("shutter").unwrap();
//! shutter.set_enabled(true).unwrap();
//! assert!(shutter.is_enabled());
//! ```

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use lasercal_types::CalError;
use ndarray::{Array2, s};
use tracing::debug;

use crate::axis::AxisDriver;
use crate::camera::{Acquisition, FrameSource, RawFrame};
use crate::laser::{
    LaserFrequencyDriver, LaserOutput, LaserPowerDriver, LaserSource, SignalGenerator,
};
use crate::output::OutputDevice;
use crate::registry::DeviceRegistry;
use crate::sensor::Sensor;
use crate::stage::{MotorStage, RotaryGeometry, StageDriver};

/// Shared write log of a [`SimAxisDriver`].
pub type WriteLog = Arc<Mutex<Vec<f64>>>;

// ────────────────────────────────────────────────────────────────────────────
// Axis driver
// ────────────────────────────────────────────────────────────────────────────

/// Simulated axis driver.
pub struct SimAxisDriver {
    id: String,
    settle_ticks: u32,
    remaining: u32,
    fail: bool,
    writes: WriteLog,
}

impl SimAxisDriver {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            settle_ticks: 0,
            remaining: 0,
            fail: false,
            writes: Arc::default(),
        }
    }

    /// Stay busy for `ticks` service calls after every write.
    pub fn with_settle_ticks(mut self, ticks: u32) -> Self {
        self.settle_ticks = ticks;
        self
    }

    /// Reject every write with a hardware fault.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Handle to the values written so far.
    pub fn write_log(&self) -> WriteLog {
        Arc::clone(&self.writes)
    }
}

impl AxisDriver for SimAxisDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn write_value(&mut self, value: f64) -> Result<(), CalError> {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(value);
        }
        if self.fail {
            return Err(CalError::hardware(&self.id, "simulated write failure"));
        }
        self.remaining = self.settle_ticks;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.remaining == 0
    }

    fn service(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

/// Simulated on/off output.
pub struct SimOutput {
    id: String,
    enabled: bool,
    history: Arc<Mutex<Vec<bool>>>,
}

impl SimOutput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: false,
            history: Arc::default(),
        }
    }

    /// Handle to every state the output has been driven to, in order.
    pub fn history(&self) -> Arc<Mutex<Vec<bool>>> {
        Arc::clone(&self.history)
    }
}

impl OutputDevice for SimOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), CalError> {
        self.enabled = enabled;
        if let Ok(mut history) = self.history.lock() {
            history.push(enabled);
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor
// ────────────────────────────────────────────────────────────────────────────

/// Simulated fixed-width sensor.
pub struct SimSensor {
    id: String,
    width: usize,
    done_after: u32,
    remaining: u32,
    reads: u64,
}

impl SimSensor {
    pub fn new(id: impl Into<String>, width: usize) -> Self {
        Self {
            id: id.into(),
            width,
            done_after: 0,
            remaining: 0,
            reads: 0,
        }
    }

    /// Report done only after `updates` calls to `update` following each
    /// `begin_measuring`.
    pub fn done_after(mut self, updates: u32) -> Self {
        self.done_after = updates;
        self
    }
}

impl Sensor for SimSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn headers(&self) -> Vec<String> {
        (0..self.width).map(|i| format!("{} {i}", self.id)).collect()
    }

    fn begin_measuring(&mut self) -> Result<(), CalError> {
        self.remaining = self.done_after;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.remaining == 0
    }

    fn update(&mut self) -> Vec<f64> {
        self.reads += 1;
        self.remaining = self.remaining.saturating_sub(1);
        vec![self.reads as f64; self.width]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Frame source
// ────────────────────────────────────────────────────────────────────────────

/// Simulated frame grabber showing a blinking square spot.
///
/// Coordinates are raw sensor pixels, before any column decimation.
pub struct SimFrameSource {
    id: String,
    rows: usize,
    cols: usize,
    spot_x: usize,
    spot_y: usize,
    spot_w: usize,
    spot_h: usize,
    background: u16,
    intensity: u16,
    half_period: u64,
    timeout_every: Option<u64>,
    running: bool,
    frames: u64,
    timeouts: u64,
}

impl SimFrameSource {
    /// A 512 × 1280 source with an 80 × 40 spot in the middle, blinking every
    /// five frames.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rows: 512,
            cols: 1280,
            spot_x: 600,
            spot_y: 236,
            spot_w: 80,
            spot_h: 40,
            background: 100,
            intensity: 4000,
            half_period: 5,
            timeout_every: None,
            running: false,
            frames: 0,
            timeouts: 0,
        }
    }

    pub fn with_frame_size(mut self, rows: usize, cols: usize) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    /// Place the spot's top-left corner at (`x`, `y`) with the given size.
    pub fn with_spot(mut self, x: usize, y: usize, width: usize, height: usize) -> Self {
        self.spot_x = x;
        self.spot_y = y;
        self.spot_w = width;
        self.spot_h = height;
        self
    }

    /// Spot is lit for `frames` frames, then dark for `frames` frames.
    /// Zero keeps it lit permanently.
    pub fn with_blink_half_period(mut self, frames: u64) -> Self {
        self.half_period = frames;
        self
    }

    /// Every `n`-th acquisition times out instead of returning a frame.
    pub fn with_timeout_every(mut self, n: u64) -> Self {
        self.timeout_every = (n > 0).then_some(n);
        self
    }

    fn spot_lit(&self) -> bool {
        self.half_period == 0 || (self.frames / self.half_period) % 2 == 0
    }

    fn render(&self) -> RawFrame {
        let mut frame = Array2::from_elem((self.rows, self.cols), self.background);
        if self.spot_lit() {
            let y_end = (self.spot_y + self.spot_h).min(self.rows);
            let x_end = (self.spot_x + self.spot_w).min(self.cols);
            let y_start = self.spot_y.min(y_end);
            let x_start = self.spot_x.min(x_end);
            frame
                .slice_mut(s![y_start..y_end, x_start..x_end])
                .fill(self.intensity);
        }
        frame
    }
}

impl FrameSource for SimFrameSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&mut self) -> Result<(), CalError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CalError> {
        self.running = false;
        Ok(())
    }

    fn acquire(&mut self) -> Result<Acquisition, CalError> {
        if !self.running {
            return Err(CalError::hardware(&self.id, "acquisition not started"));
        }
        let attempt = self.frames + self.timeouts + 1;
        if self.timeout_every.is_some_and(|n| attempt % n == 0) {
            self.timeouts += 1;
            debug!(source = %self.id, timeouts = self.timeouts, "simulated timeout");
            return Ok(Acquisition::TimedOut);
        }
        let frame = self.render();
        self.frames += 1;
        Ok(Acquisition::Frame(frame))
    }

    fn timeouts(&self) -> u64 {
        self.timeouts
    }

    fn restart_after_timeout(&mut self) -> Result<(), CalError> {
        debug!(source = %self.id, "simulated grabber restart");
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stage and signal generator
// ────────────────────────────────────────────────────────────────────────────

/// Simulated motor stage.  Moves are instantaneous but the stage reports
/// motion for `motion_polls` polls afterwards.
pub struct SimStage {
    serial: String,
    position: f64,
    homed: bool,
    motion_polls: u32,
    polls_left: Cell<u32>,
}

impl SimStage {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            position: 0.0,
            homed: false,
            motion_polls: 2,
            polls_left: Cell::new(0),
        }
    }

    pub fn homed(mut self) -> Self {
        self.homed = true;
        self
    }

    pub fn with_motion_polls(mut self, polls: u32) -> Self {
        self.motion_polls = polls;
        self
    }
}

impl MotorStage for SimStage {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn move_to(&mut self, position: f64) -> Result<(), CalError> {
        self.position = position;
        self.polls_left.set(self.motion_polls);
        Ok(())
    }

    fn move_home(&mut self) -> Result<(), CalError> {
        self.position = 0.0;
        self.homed = true;
        self.polls_left.set(self.motion_polls);
        Ok(())
    }

    fn is_in_motion(&self) -> bool {
        let left = self.polls_left.get();
        self.polls_left.set(left.saturating_sub(1));
        left > 0
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn has_been_homed(&self) -> bool {
        self.homed
    }
}

/// Last `(frequency, amplitude, offset)` applied to a [`SimSignalGenerator`].
pub type SquareLog = Arc<Mutex<Option<(f64, f64, f64)>>>;

/// Simulated function generator.
pub struct SimSignalGenerator {
    id: String,
    output: bool,
    last: SquareLog,
}

impl SimSignalGenerator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: false,
            last: Arc::default(),
        }
    }

    pub fn last_applied(&self) -> SquareLog {
        Arc::clone(&self.last)
    }

    pub fn output_on(&self) -> bool {
        self.output
    }
}

impl SignalGenerator for SimSignalGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_output(&mut self, on: bool) -> Result<(), CalError> {
        self.output = on;
        Ok(())
    }

    fn apply_square(
        &mut self,
        frequency_hz: f64,
        amplitude: f64,
        offset: f64,
    ) -> Result<(), CalError> {
        if let Ok(mut last) = self.last.lock() {
            *last = Some((frequency_hz, amplitude, offset));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRegistry builder
// ────────────────────────────────────────────────────────────────────────────

enum StageKind {
    Linear,
    Rotary,
}

/// Builder that constructs a [`DeviceRegistry`] populated with simulated
/// drivers.
#[derive(Default)]
pub struct SimRegistry {
    axes: Vec<(String, u32)>,
    outputs: Vec<String>,
    sensors: Vec<(String, usize)>,
    cameras: Vec<String>,
    lasers: Vec<String>,
    stages: Vec<(String, StageKind)>,
}

impl SimRegistry {
    pub fn builder() -> Self {
        Self::default()
    }

    /// A [`SimAxisDriver`] that settles after `settle_ticks` ticks.
    pub fn with_axis(mut self, id: impl Into<String>, settle_ticks: u32) -> Self {
        self.axes.push((id.into(), settle_ticks));
        self
    }

    pub fn with_output(mut self, id: impl Into<String>) -> Self {
        self.outputs.push(id.into());
        self
    }

    pub fn with_sensor(mut self, id: impl Into<String>, width: usize) -> Self {
        self.sensors.push((id.into(), width));
        self
    }

    /// A [`SimFrameSource`] with default geometry.
    pub fn with_camera(mut self, id: impl Into<String>) -> Self {
        self.cameras.push(id.into());
        self
    }

    /// A laser on a simulated generator, registered as output `id` and as
    /// axis drivers `{id}_power` and `{id}_frequency`.
    pub fn with_laser(mut self, id: impl Into<String>) -> Self {
        self.lasers.push(id.into());
        self
    }

    /// An un-homed linear stage; homing starts when the registry is built.
    pub fn with_linear_stage(mut self, serial: impl Into<String>) -> Self {
        self.stages.push((serial.into(), StageKind::Linear));
        self
    }

    /// An un-homed rotation stage with default geometry.
    pub fn with_rotary_stage(mut self, serial: impl Into<String>) -> Self {
        self.stages.push((serial.into(), StageKind::Rotary));
        self
    }

    /// Consume the builder and return a populated [`DeviceRegistry`].
    ///
    /// # Errors
    ///
    /// Propagates failures from attaching stages or initialising lasers.
    pub fn build(self) -> Result<DeviceRegistry, CalError> {
        let mut registry = DeviceRegistry::new();

        for (id, settle) in self.axes {
            let driver = SimAxisDriver::new(id).with_settle_ticks(settle);
            registry.register_axis_driver(Box::new(driver));
        }
        for id in self.outputs {
            registry.register_output(Box::new(SimOutput::new(id)));
        }
        for (id, width) in self.sensors {
            registry.register_sensor(Box::new(SimSensor::new(id, width)));
        }
        for id in self.cameras {
            registry.register_frame_source(Box::new(SimFrameSource::new(id)));
        }
        for id in self.lasers {
            let generator = SimSignalGenerator::new(format!("{id}_generator"));
            let laser = LaserSource::new(Box::new(generator))?.shared();
            registry.register_axis_driver(Box::new(LaserPowerDriver::new(
                format!("{id}_power"),
                Arc::clone(&laser),
            )));
            registry.register_axis_driver(Box::new(LaserFrequencyDriver::new(
                format!("{id}_frequency"),
                Arc::clone(&laser),
            )));
            registry.register_output(Box::new(LaserOutput::new(id, laser)));
        }
        for (serial, kind) in self.stages {
            let stage = Box::new(SimStage::new(serial));
            let driver = match kind {
                StageKind::Linear => StageDriver::linear(stage)?,
                StageKind::Rotary => StageDriver::rotary(stage, RotaryGeometry::default())?,
            };
            registry.register_axis_driver(Box::new(driver));
        }

        Ok(registry)
    }
}
