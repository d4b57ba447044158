//! Test-bench wiring: turns a [`ScanFile`] into axes, an output and a camera
//! sensor drawn from a [`DeviceRegistry`].
//!
//! The CLI runs on simulated hardware.  Each axis kind maps to a driver id:
//!
//! | Kind | Driver |
//! |---|---|
//! | `linear` | linear stage with serial = axis name |
//! | `rotate` | rotary stage with serial = axis name |
//! | `laser_power` | `laser_power` |
//! | `laser_frequency` | `laser_frequency` |
//! | `auxiliary` | simulated axis with id = axis name |
//!
//! The laser itself is the scan's output device and the camera is always
//! `camera`.

use lasercal_hal::sim::SimRegistry;
use lasercal_hal::{Axis, DeviceRegistry, OutputDevice};
use lasercal_runtime::CameraSensor;
use lasercal_types::{AxisKind, CalError};

use crate::config::ScanFile;

pub const LASER_ID: &str = "laser";
pub const CAMERA_ID: &str = "camera";

/// Everything a scan needs, plus the registry that still owns the unused
/// devices.
pub struct Bench {
    pub axes: Vec<Axis>,
    pub output: Box<dyn OutputDevice>,
    pub sensor: CameraSensor,
    pub registry: DeviceRegistry,
}

/// Simulated registry with one device per axis, the laser and the camera.
pub fn registry_for(file: &ScanFile) -> Result<DeviceRegistry, CalError> {
    let mut builder = SimRegistry::builder()
        .with_laser(LASER_ID)
        .with_camera(CAMERA_ID);
    for axis in &file.axes {
        builder = match axis.kind {
            AxisKind::Linear => builder.with_linear_stage(&axis.name),
            AxisKind::Rotate => builder.with_rotary_stage(&axis.name),
            AxisKind::Auxiliary => builder.with_axis(&axis.name, 0),
            AxisKind::LaserPower | AxisKind::LaserFrequency => builder,
        };
    }
    builder.build()
}

fn driver_id(name: &str, kind: AxisKind) -> String {
    match kind {
        AxisKind::LaserPower => format!("{LASER_ID}_power"),
        AxisKind::LaserFrequency => format!("{LASER_ID}_frequency"),
        AxisKind::Linear | AxisKind::Rotate | AxisKind::Auxiliary => name.to_string(),
    }
}

/// Build the axes, output and camera for `file`.  The camera worker is
/// running when this returns.
///
/// # Errors
///
/// Returns [`CalError::DeviceNotFound`] when two axes need the same driver
/// and [`CalError::InvalidBounds`] for inverted axis bounds.
pub fn assemble(file: &ScanFile) -> Result<Bench, CalError> {
    let mut registry = registry_for(file)?;

    let mut axes = Vec::with_capacity(file.axes.len());
    for entry in &file.axes {
        let driver = registry.take_axis_driver(&driver_id(&entry.name, entry.kind))?;
        let axis = Axis::new(&entry.name, entry.kind, entry.min, entry.max, driver)?
            .with_points(entry.resolved_points());
        axes.push(axis);
    }

    let output = registry.take_output(LASER_ID)?;
    let source = registry.take_frame_source(CAMERA_ID)?;
    let mut sensor = CameraSensor::new(source, file.camera.acquisition_settings())
        .with_window(file.camera.dwell(), file.camera.min_frames);
    // Settle-window rows are captured before the first measurement window
    // opens, so frames must already be flowing.
    sensor.start()?;

    Ok(Bench {
        axes,
        output,
        sensor,
        registry,
    })
}
