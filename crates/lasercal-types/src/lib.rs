//! `lasercal-types` – shared value types for the calibration workspace.
//!
//! Every crate in the workspace speaks in terms of these types: the HAL layer
//! produces [`FrameMeasurement`]s and consumes [`AnalyzerConfig`]s, the
//! runtime accumulates [`DataRow`]s while walking through [`ScanState`]s, and
//! everything reports failures through [`CalError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default sensor width in pixels after column decimation.
pub const DEFAULT_FRAME_WIDTH: i32 = 640;
/// Default sensor height in pixels.
pub const DEFAULT_FRAME_HEIGHT: i32 = 512;

// ────────────────────────────────────────────────────────────────────────────
// Axis kinds
// ────────────────────────────────────────────────────────────────────────────

/// The physical quantity an axis controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    /// Linear stage position (mm).
    #[default]
    Linear,
    /// Rotation stage, expressed as a displacement on the target surface.
    Rotate,
    /// Laser drive power, normalised to `0.0..=1.0`.
    LaserPower,
    /// Laser modulation frequency (Hz).
    LaserFrequency,
    /// Any other scalar output.
    Auxiliary,
}

impl std::fmt::Display for AxisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisKind::Linear => write!(f, "linear"),
            AxisKind::Rotate => write!(f, "rotate"),
            AxisKind::LaserPower => write!(f, "laser_power"),
            AxisKind::LaserFrequency => write!(f, "laser_frequency"),
            AxisKind::Auxiliary => write!(f, "auxiliary"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Frame analysis configuration
// ────────────────────────────────────────────────────────────────────────────

/// Rectangular region of interest in full-frame pixel coordinates.
///
/// `x_max` and `y_max` are exclusive, matching slice semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    pub x_min: i32,
    pub x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
}

impl Roi {
    /// A region covering a whole `width` × `height` frame.
    pub fn full(width: i32, height: i32) -> Self {
        Self {
            x_min: 0,
            x_max: width,
            y_min: 0,
            y_max: height,
        }
    }

    /// Width of the region; zero or negative when degenerate.
    pub fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    /// Height of the region; zero or negative when degenerate.
    pub fn height(&self) -> i32 {
        self.y_max - self.y_min
    }

    /// `true` when either dimension is zero or inverted.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

impl Default for Roi {
    fn default() -> Self {
        Self::full(DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT)
    }
}

/// Tunable parameters of the frame-analysis pipeline.
///
/// The acquisition worker replaces its copy of this struct as a whole, so a
/// frame is always analysed with one consistent configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Edge binarisation level applied to each 8-bit gradient component.
    pub threshold: i32,
    /// Minimum bounding-box area (px²) a contour must have to count as a blob.
    pub min_blob_area: i32,
    /// Power level above which the beam is considered "on".
    pub on_threshold: i32,
    /// Region of interest used for detection.
    pub roi: Roi,
}

impl AnalyzerConfig {
    /// Build a configuration from the flat parameter tuple used by the
    /// configuration update channel.
    pub fn from_params(
        threshold: i32,
        min_blob_area: i32,
        on_threshold: i32,
        x_min: i32,
        x_max: i32,
        y_min: i32,
        y_max: i32,
    ) -> Self {
        Self {
            threshold,
            min_blob_area,
            on_threshold,
            roi: Roi {
                x_min,
                x_max,
                y_min,
                y_max,
            },
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            threshold: 18,
            min_blob_area: 50,
            on_threshold: 17,
            roi: Roi::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Measurements
// ────────────────────────────────────────────────────────────────────────────

/// Column headers for the values produced by [`FrameMeasurement::values`].
pub const CAMERA_HEADERS: [&str; 5] = [
    "Camera X",
    "Camera Y",
    "Camera Power",
    "Camera Frequency",
    "Camera FPS",
];

/// Result of analysing one camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameMeasurement {
    /// Left edge of the aggregate bounding box (full-frame pixels).
    pub xpos: i32,
    /// Top edge of the aggregate bounding box (full-frame pixels).
    pub ypos: i32,
    /// Area enclosed by the union of all surviving blob contours.
    pub power: f64,
    /// Estimated modulation frequency from rising-edge spacing (Hz).
    pub frequency: f64,
    /// Measured acquisition rate (Hz).
    pub fps: f64,
    /// Whether `power` exceeded the on-threshold for this frame.
    pub on: bool,
}

impl FrameMeasurement {
    /// The snapshot tuple `(x, y, power, frequency, fps)` recorded per row.
    pub fn values(&self) -> Vec<f64> {
        vec![
            f64::from(self.xpos),
            f64::from(self.ypos),
            self.power,
            self.frequency,
            self.fps,
        ]
    }
}

/// One captured line of the result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub timestamp: DateTime<Utc>,
    /// One value per configured axis, in declaration order.
    pub axis_values: Vec<f64>,
    /// The sensor snapshot at the time of capture.
    pub sensor_values: Vec<f64>,
}

impl DataRow {
    /// Number of value columns (excluding the timestamp).
    pub fn width(&self) -> usize {
        self.axis_values.len() + self.sensor_values.len()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scan state
// ────────────────────────────────────────────────────────────────────────────

/// States of the scan orchestration machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanState {
    BeginStep,
    WaitStep,
    BeginPreDelay,
    WaitPreDelay,
    BeginEnable,
    WaitEnable,
    BeginPostDelay,
    WaitPostDelay,
    Done,
}

impl ScanState {
    /// `true` for the six states between arrival and the next move, i.e. the
    /// settle–measure–settle window in which rows may be captured.
    pub fn in_settle_window(&self) -> bool {
        matches!(
            self,
            ScanState::BeginPreDelay
                | ScanState::WaitPreDelay
                | ScanState::BeginEnable
                | ScanState::WaitEnable
                | ScanState::BeginPostDelay
                | ScanState::WaitPostDelay
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Invalid bounds for axis '{axis}': max {max} < min {min}")]
    InvalidBounds { axis: String, min: f64, max: f64 },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Row has {actual} value columns, table expects {expected}")]
    RowShape { expected: usize, actual: usize },

    #[error("Failed to persist results to {path}: {details}")]
    Persistence { path: String, details: String },

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}

impl CalError {
    /// Shorthand for a [`CalError::HardwareFault`].
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        CalError::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }
}
