//! [`CameraSensor`] – the frame-analysis pipeline exposed as a [`Sensor`].
//!
//! Sampling is continuous: the acquisition worker starts on the first
//! [`begin_measuring`][Sensor::begin_measuring] (or an explicit
//! [`start`][CameraSensor::start]) and keeps running between measurement
//! windows.  A window closes once it has lasted `dwell` and at least
//! `min_frames` new frames have been analysed inside it.

use std::time::{Duration, Instant};

use lasercal_hal::{FrameSource, Sensor};
use lasercal_types::{AnalyzerConfig, CAMERA_HEADERS, CalError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::acquisition::{AcquisitionHandle, AcquisitionLoop, AcquisitionSettings, Snapshot};

/// Open measurement window.
#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    first_sequence: u64,
}

pub struct CameraSensor {
    id: String,
    source: Option<Box<dyn FrameSource>>,
    handle: Option<AcquisitionHandle>,
    settings: AcquisitionSettings,
    dwell: Duration,
    min_frames: u64,
    window: Option<Window>,
}

impl std::fmt::Debug for CameraSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSensor")
            .field("id", &self.id)
            .field("running", &self.handle.is_some())
            .field("dwell", &self.dwell)
            .field("min_frames", &self.min_frames)
            .finish()
    }
}

impl CameraSensor {
    /// Wrap `source`; nothing is acquired until the sensor is started.
    /// Windows close immediately unless [`with_window`][Self::with_window]
    /// says otherwise.
    pub fn new(source: Box<dyn FrameSource>, settings: AcquisitionSettings) -> Self {
        Self {
            id: source.id().to_string(),
            source: Some(source),
            handle: None,
            settings,
            dwell: Duration::ZERO,
            min_frames: 0,
            window: None,
        }
    }

    /// Require every measurement window to last at least `dwell` and to see
    /// at least `min_frames` freshly analysed frames.
    pub fn with_window(mut self, dwell: Duration, min_frames: u64) -> Self {
        self.dwell = dwell;
        self.min_frames = min_frames;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start the acquisition worker.  Does nothing if it is already running.
    ///
    /// # Errors
    ///
    /// Returns the frame source's start error, or
    /// [`CalError::DeviceNotFound`] if the source was lost to an earlier
    /// failed start.
    pub fn start(&mut self) -> Result<(), CalError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| CalError::DeviceNotFound(format!("frame source '{}'", self.id)))?;
        self.handle = Some(AcquisitionLoop::spawn(source, self.settings.clone())?);
        Ok(())
    }

    /// Stop the worker and keep the source for a later restart.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::Channel`] if the worker thread panicked; the
    /// source is lost in that case.
    pub fn stop(&mut self) -> Result<(), CalError> {
        if let Some(handle) = self.handle.take() {
            self.source = Some(handle.stop()?);
        }
        self.window = None;
        Ok(())
    }

    /// Replace the analyzer configuration.  Applied before the next frame
    /// when running, and used for the first frame otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::Channel`] if the worker has exited.
    pub fn configure(&mut self, config: AnalyzerConfig) -> Result<(), CalError> {
        self.settings.analyzer = config;
        match &self.handle {
            Some(handle) => handle.configure(config),
            None => Ok(()),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.settings.analyzer
    }

    /// Latest analysed frame, for display.
    pub fn latest(&self) -> Option<Snapshot> {
        self.handle.as_ref().and_then(AcquisitionHandle::latest)
    }

    /// Receiver for every new snapshot; `None` until started.
    pub fn subscribe(&self) -> Option<watch::Receiver<Option<Snapshot>>> {
        self.handle.as_ref().map(AcquisitionHandle::subscribe)
    }

    fn sequence(&self) -> u64 {
        self.latest().map_or(0, |s| s.sequence)
    }
}

impl Sensor for CameraSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn headers(&self) -> Vec<String> {
        CAMERA_HEADERS.iter().map(|h| h.to_string()).collect()
    }

    fn begin_measuring(&mut self) -> Result<(), CalError> {
        self.start()?;
        let window = Window {
            opened: Instant::now(),
            first_sequence: self.sequence(),
        };
        debug!(camera = %self.id, from_frame = window.first_sequence, "measurement window opened");
        self.window = Some(window);
        Ok(())
    }

    fn is_done(&self) -> bool {
        let Some(window) = self.window else {
            return true;
        };
        if window.opened.elapsed() < self.dwell {
            return false;
        }
        self.sequence().saturating_sub(window.first_sequence) >= self.min_frames
    }

    fn update(&mut self) -> Vec<f64> {
        match self.latest() {
            Some(snapshot) => snapshot.values(),
            None => vec![0.0; CAMERA_HEADERS.len()],
        }
    }
}

impl Drop for CameraSensor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(camera = %self.id, error = %e, "camera did not stop cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lasercal_hal::sim::SimFrameSource;
    use std::thread;

    fn camera() -> CameraSensor {
        let source = SimFrameSource::new("cam")
            .with_frame_size(64, 128)
            .with_spot(40, 20, 30, 12)
            .with_blink_half_period(0);
        let settings = AcquisitionSettings {
            frame_interval: Duration::from_millis(1),
            ..AcquisitionSettings::default()
        };
        CameraSensor::new(Box::new(source), settings)
    }

    fn wait_until(pred: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn idle_sensor_reports_zeros() {
        let mut cam = camera();
        assert_eq!(cam.headers().len(), 5);
        assert_eq!(cam.headers()[0], "Camera X");
        assert_eq!(cam.update(), vec![0.0; 5]);
        assert!(cam.is_done());
        assert!(!cam.is_running());
    }

    #[test]
    fn window_waits_for_dwell_and_frames() {
        let mut cam = camera().with_window(Duration::from_millis(30), 3);
        cam.begin_measuring().unwrap();
        assert!(cam.is_running());
        assert!(!cam.is_done());
        assert!(wait_until(|| cam.is_done()));

        let values = cam.update();
        assert_eq!(values.len(), 5);
        // Power is non-zero with the spot in view.
        assert!(values[2] > 0.0);
    }

    #[test]
    fn stop_and_restart_reuse_the_source() {
        let mut cam = camera();
        cam.start().unwrap();
        assert!(wait_until(|| cam.latest().is_some()));
        cam.stop().unwrap();
        assert!(!cam.is_running());
        assert!(cam.latest().is_none());

        cam.start().unwrap();
        assert!(wait_until(|| cam.latest().is_some()));
    }

    #[test]
    fn configure_before_start_seeds_first_frame() {
        let mut cam = camera();
        let mut config = AnalyzerConfig::default();
        config.roi.x_min = 50;
        cam.configure(config).unwrap();
        cam.start().unwrap();
        assert!(wait_until(|| cam.latest().is_some()));
        let snap = cam.latest().unwrap();
        assert_eq!(snap.frame.roi.x_min, 50);
        assert!(!snap.measurement.on);
    }
}
