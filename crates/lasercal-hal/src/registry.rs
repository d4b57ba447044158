//! [`DeviceRegistry`] – explicitly constructed, lifetime-scoped device
//! registry.
//!
//! Drivers are registered once at start-up and handed out by identifier when
//! a scan is assembled.  A driver that has been taken belongs to the caller;
//! whatever is still registered when the registry is shut down (or dropped)
//! is put into a safe state: outputs are switched off and frame sources are
//! stopped.

use std::collections::HashMap;
use std::fmt;

use lasercal_types::CalError;
use tracing::{info, warn};

use crate::axis::AxisDriver;
use crate::camera::FrameSource;
use crate::output::OutputDevice;
use crate::sensor::Sensor;

/// What role a registered device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceClass {
    Axis,
    Output,
    Sensor,
    FrameSource,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Axis => write!(f, "axis"),
            DeviceClass::Output => write!(f, "output"),
            DeviceClass::Sensor => write!(f, "sensor"),
            DeviceClass::FrameSource => write!(f, "frame source"),
        }
    }
}

/// One entry of [`DeviceRegistry::devices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub class: DeviceClass,
}

/// Registry of available drivers, keyed by identifier.
#[derive(Default)]
pub struct DeviceRegistry {
    axes: HashMap<String, Box<dyn AxisDriver>>,
    outputs: HashMap<String, Box<dyn OutputDevice>>,
    sensors: HashMap<String, Box<dyn Sensor>>,
    frame_sources: HashMap<String, Box<dyn FrameSource>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an axis driver.  Any previously registered driver with the
    /// same `id` is replaced.
    pub fn register_axis_driver(&mut self, driver: Box<dyn AxisDriver>) {
        self.axes.insert(driver.id().to_string(), driver);
    }

    /// Register an output.  Any previously registered output with the same
    /// `id` is replaced.
    pub fn register_output(&mut self, output: Box<dyn OutputDevice>) {
        self.outputs.insert(output.id().to_string(), output);
    }

    /// Register a sensor.  Any previously registered sensor with the same
    /// `id` is replaced.
    pub fn register_sensor(&mut self, sensor: Box<dyn Sensor>) {
        self.sensors.insert(sensor.id().to_string(), sensor);
    }

    /// Register a frame source.  Any previously registered source with the
    /// same `id` is replaced.
    pub fn register_frame_source(&mut self, source: Box<dyn FrameSource>) {
        self.frame_sources.insert(source.id().to_string(), source);
    }

    /// Remove and return the axis driver registered as `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::DeviceNotFound`] when no such driver is registered.
    pub fn take_axis_driver(&mut self, id: &str) -> Result<Box<dyn AxisDriver>, CalError> {
        take(&mut self.axes, id, DeviceClass::Axis)
    }

    /// Remove and return the output registered as `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::DeviceNotFound`] when no such output is registered.
    pub fn take_output(&mut self, id: &str) -> Result<Box<dyn OutputDevice>, CalError> {
        take(&mut self.outputs, id, DeviceClass::Output)
    }

    /// Remove and return the sensor registered as `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::DeviceNotFound`] when no such sensor is registered.
    pub fn take_sensor(&mut self, id: &str) -> Result<Box<dyn Sensor>, CalError> {
        take(&mut self.sensors, id, DeviceClass::Sensor)
    }

    /// Remove and return the frame source registered as `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::DeviceNotFound`] when no such source is registered.
    pub fn take_frame_source(&mut self, id: &str) -> Result<Box<dyn FrameSource>, CalError> {
        take(&mut self.frame_sources, id, DeviceClass::FrameSource)
    }

    /// Everything still registered, ordered by class then identifier.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        let mut out: Vec<DeviceInfo> = self
            .axes
            .keys()
            .map(|id| (id, DeviceClass::Axis))
            .chain(self.outputs.keys().map(|id| (id, DeviceClass::Output)))
            .chain(self.sensors.keys().map(|id| (id, DeviceClass::Sensor)))
            .chain(
                self.frame_sources
                    .keys()
                    .map(|id| (id, DeviceClass::FrameSource)),
            )
            .map(|(id, class)| DeviceInfo {
                id: id.clone(),
                class,
            })
            .collect();
        out.sort_by(|a, b| a.class.cmp(&b.class).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
            && self.outputs.is_empty()
            && self.sensors.is_empty()
            && self.frame_sources.is_empty()
    }

    /// Switch every registered output off and stop every registered frame
    /// source.  Failures are logged; the remaining devices are still visited.
    pub fn shutdown(&mut self) {
        for output in self.outputs.values_mut() {
            if let Err(e) = output.set_enabled(false) {
                warn!(output = %output.id(), error = %e, "failed to disable output on shutdown");
            }
        }
        for source in self.frame_sources.values_mut() {
            if let Err(e) = source.stop() {
                warn!(source = %source.id(), error = %e, "failed to stop frame source on shutdown");
            }
        }
        info!(
            outputs = self.outputs.len(),
            frame_sources = self.frame_sources.len(),
            "device registry shut down"
        );
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.shutdown();
        }
    }
}

fn take<T: ?Sized>(
    map: &mut HashMap<String, Box<T>>,
    id: &str,
    class: DeviceClass,
) -> Result<Box<T>, CalError> {
    map.remove(id)
        .ok_or_else(|| CalError::DeviceNotFound(format!("{class} '{id}'")))
}
