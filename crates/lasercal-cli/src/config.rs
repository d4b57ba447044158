//! Scan file – reads/writes the TOML description of one calibration scan.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lasercal_hal::Axis;
use lasercal_runtime::{AcquisitionSettings, CaptureWindow, CsvFormat, OnGotoFailure, ScanSettings};
use lasercal_types::{AnalyzerConfig, AxisKind, Roi};

/// A complete scan file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScanFile {
    #[serde(default)]
    pub scan: ScanSection,

    #[serde(default, rename = "axis")]
    pub axes: Vec<AxisEntry>,

    #[serde(default)]
    pub camera: CameraSection,
}

/// `[scan]` – timing, capture and output options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSection {
    #[serde(default)]
    pub pre_delay_ms: u64,

    #[serde(default)]
    pub post_delay_ms: u64,

    /// Scan tick period.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// CSV destination; rows stay in memory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Write a header line before the rows.
    #[serde(default)]
    pub header: bool,

    #[serde(default)]
    pub capture: CaptureWindow,

    #[serde(default)]
    pub on_goto_failure: OnGotoFailure,
}

/// One `[[axis]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisEntry {
    pub name: String,
    pub kind: AxisKind,
    pub min: f64,
    pub max: f64,

    /// Explicit scan points.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<f64>,

    /// Evenly spaced points from `min`, used when `points` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<usize>,
}

/// `[camera]` – analyzer parameters and measurement window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSection {
    #[serde(default = "default_threshold")]
    pub threshold: i32,
    #[serde(default = "default_min_blob_area")]
    pub min_blob_area: i32,
    #[serde(default = "default_on_threshold")]
    pub on_threshold: i32,
    #[serde(default)]
    pub x_min: i32,
    #[serde(default = "default_x_max")]
    pub x_max: i32,
    #[serde(default)]
    pub y_min: i32,
    #[serde(default = "default_y_max")]
    pub y_max: i32,

    /// Minimum length of each measurement window.
    #[serde(default)]
    pub dwell_ms: u64,

    /// Fresh frames required before a measurement window may close.
    #[serde(default = "default_min_frames")]
    pub min_frames: u64,

    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    #[serde(default = "default_column_stride")]
    pub column_stride: usize,
}

fn default_tick_ms() -> u64 {
    10
}
fn default_delimiter() -> char {
    ','
}
fn default_threshold() -> i32 {
    AnalyzerConfig::default().threshold
}
fn default_min_blob_area() -> i32 {
    AnalyzerConfig::default().min_blob_area
}
fn default_on_threshold() -> i32 {
    AnalyzerConfig::default().on_threshold
}
fn default_x_max() -> i32 {
    Roi::default().x_max
}
fn default_y_max() -> i32 {
    Roi::default().y_max
}
fn default_min_frames() -> u64 {
    1
}
fn default_frame_interval_ms() -> u64 {
    20
}
fn default_column_stride() -> usize {
    2
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            pre_delay_ms: 0,
            post_delay_ms: 0,
            tick_ms: default_tick_ms(),
            output: None,
            delimiter: default_delimiter(),
            header: false,
            capture: CaptureWindow::default(),
            on_goto_failure: OnGotoFailure::default(),
        }
    }
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_blob_area: default_min_blob_area(),
            on_threshold: default_on_threshold(),
            x_min: 0,
            x_max: default_x_max(),
            y_min: 0,
            y_max: default_y_max(),
            dwell_ms: 0,
            min_frames: default_min_frames(),
            frame_interval_ms: default_frame_interval_ms(),
            column_stride: default_column_stride(),
        }
    }
}

impl ScanSection {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Runtime settings for this section.
    pub fn settings(&self) -> Result<ScanSettings, String> {
        if !self.delimiter.is_ascii() {
            return Err(format!(
                "delimiter '{}' must be a single ASCII character",
                self.delimiter
            ));
        }
        Ok(ScanSettings {
            pre_delay: Duration::from_millis(self.pre_delay_ms),
            post_delay: Duration::from_millis(self.post_delay_ms),
            destination: self.output.clone(),
            csv: CsvFormat {
                delimiter: self.delimiter as u8,
                header: self.header,
            },
            capture: self.capture,
            on_goto_failure: self.on_goto_failure,
        })
    }
}

impl AxisEntry {
    /// The scan points: explicit `points`, else `steps` evenly spaced ones.
    pub fn resolved_points(&self) -> Vec<f64> {
        match (self.points.is_empty(), self.steps) {
            (true, Some(steps)) => Axis::linspace(self.min, self.max, steps),
            _ => self.points.clone(),
        }
    }
}

impl CameraSection {
    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig::from_params(
            self.threshold,
            self.min_blob_area,
            self.on_threshold,
            self.x_min,
            self.x_max,
            self.y_min,
            self.y_max,
        )
    }

    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            column_stride: self.column_stride,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            analyzer: self.analyzer_config(),
        }
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
}

impl ScanFile {
    /// Reject files that cannot describe a scan.
    pub fn validate(&self) -> Result<(), String> {
        if self.axes.is_empty() {
            return Err("scan file declares no [[axis]] entries".to_string());
        }
        let mut names = HashSet::new();
        for axis in &self.axes {
            if !names.insert(axis.name.as_str()) {
                return Err(format!("axis '{}' is declared twice", axis.name));
            }
            if axis.max < axis.min {
                return Err(format!(
                    "axis '{}' has max {} below min {}",
                    axis.name, axis.max, axis.min
                ));
            }
        }
        Ok(())
    }
}

/// Load, override from the environment, and validate a scan file.
pub fn load_from(path: &Path) -> Result<ScanFile, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read scan file at {}: {}", path.display(), e))?;
    let mut file = parse(&raw)?;
    apply_env_overrides(&mut file);
    file.validate()?;
    Ok(file)
}

pub fn parse(raw: &str) -> Result<ScanFile, String> {
    toml::from_str(raw).map_err(|e| format!("Failed to parse scan file: {}", e))
}

/// Apply `LASERCAL_*` environment variable overrides to `file`.
///
/// | Variable | Field |
/// |---|---|
/// | `LASERCAL_OUTPUT` | `scan.output` |
/// | `LASERCAL_PRE_DELAY_MS` | `scan.pre_delay_ms` |
/// | `LASERCAL_POST_DELAY_MS` | `scan.post_delay_ms` |
/// | `LASERCAL_TICK_MS` | `scan.tick_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(file: &mut ScanFile) {
    if let Ok(v) = std::env::var("LASERCAL_OUTPUT") {
        file.scan.output = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("LASERCAL_PRE_DELAY_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        file.scan.pre_delay_ms = ms;
    }
    if let Ok(v) = std::env::var("LASERCAL_POST_DELAY_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        file.scan.post_delay_ms = ms;
    }
    if let Ok(v) = std::env::var("LASERCAL_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        file.scan.tick_ms = ms;
    }
}

/// Save a scan file, creating parent directories as needed.
pub fn save_to(file: &ScanFile, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create directory {}: {}", parent.display(), e))?;
    }
    let raw = toml::to_string_pretty(file)
        .map_err(|e| format!("Failed to serialize scan file: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write scan file at {}: {}", path.display(), e))
}

/// Sample scan file printed by `lasercal example`.
pub const EXAMPLE: &str = r#"# Laser pointing calibration scan.

[scan]
pre_delay_ms = 200
post_delay_ms = 100
tick_ms = 10
output = "scan.csv"
delimiter = ","
header = true
capture = "settle"            # or "measurement"
on_goto_failure = "proceed"   # or "abort"

[[axis]]
name = "x"
kind = "linear"
min = 0.0
max = 25.0
steps = 5

[[axis]]
name = "tilt"
kind = "rotate"
min = -50.0
max = 50.0
points = [-40.0, 0.0, 40.0]

[[axis]]
name = "power"
kind = "laser_power"
min = 0.0
max = 1.0
points = [0.5]

[camera]
threshold = 18
min_blob_area = 50
on_threshold = 17
x_min = 0
x_max = 640
y_min = 0
y_max = 512
dwell_ms = 100
min_frames = 3
frame_interval_ms = 20
"#;
