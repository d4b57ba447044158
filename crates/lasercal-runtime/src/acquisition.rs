//! Camera acquisition worker.
//!
//! [`AcquisitionLoop::spawn`] moves a [`FrameSource`] onto a dedicated
//! thread that grabs, decimates and analyses frames back to back.  The
//! thread is the only owner of the source for as long as it runs.
//!
//! Two channels cross the thread boundary:
//!
//! - **Commands in**: an `mpsc` queue of [`Command`]s.  The queue is drained
//!   before every frame and the last configuration wins, so a frame is never
//!   analysed with a half-applied configuration.
//! - **Snapshots out**: a `tokio::sync::watch` slot holding the latest
//!   [`Snapshot`].  Readers clone the `Arc` out and never block the worker.
//!
//! Acquisition timeouts are recovered in place with [`TimeoutRecovery`] and
//! never reach the consumer.

use std::sync::Arc;
use std::sync::mpsc::{self, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lasercal_hal::camera::decimate_columns;
use lasercal_hal::{Acquisition, FrameSource};
use lasercal_types::{AnalyzerConfig, CalError, FrameMeasurement};
use lasercal_vision::{AnalyzedFrame, FrameAnalyzer};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Pause after a hard acquisition error before trying again.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Worker parameters fixed at spawn time.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    /// Keep every `column_stride`-th column of the raw frame.
    pub column_stride: usize,
    /// Sleep between frames.  Zero runs as fast as `acquire` returns.
    pub frame_interval: Duration,
    /// Analyzer configuration for the first frame.
    pub analyzer: AnalyzerConfig,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            column_stride: 2,
            frame_interval: Duration::ZERO,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

/// Messages accepted by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Replace the analyzer configuration before the next frame.
    Configure(AnalyzerConfig),
    /// Stop acquisition and exit the thread.
    Stop,
}

/// The most recent analysed frame.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Number of frames analysed when this snapshot was produced, from 1.
    pub sequence: u64,
    pub measurement: FrameMeasurement,
    /// Measurement plus annotated image, shared with every reader.
    pub frame: Arc<AnalyzedFrame>,
}

impl Snapshot {
    pub fn values(&self) -> Vec<f64> {
        self.measurement.values()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Timeout recovery
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    Restart,
}

/// Two-phase restart policy for grabber timeouts.
///
/// A rising timeout counter triggers a restart and marks the grabber as
/// recovering.  The first check after the counter stops rising issues one
/// more restart and clears the mark.  A grabber that keeps timing out is
/// restarted once per check, never more.
#[derive(Debug, Clone, Default)]
pub struct TimeoutRecovery {
    seen: u64,
    recovering: bool,
}

impl TimeoutRecovery {
    /// Feed the cumulative timeout count.
    pub fn observe(&mut self, timeouts: u64) -> RecoveryAction {
        let action = if timeouts > self.seen {
            self.recovering = true;
            RecoveryAction::Restart
        } else if self.recovering {
            self.recovering = false;
            RecoveryAction::Restart
        } else {
            RecoveryAction::None
        };
        self.seen = timeouts;
        action
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Worker
// ────────────────────────────────────────────────────────────────────────────

/// Entry point for the acquisition thread.
pub struct AcquisitionLoop {
    source: Box<dyn FrameSource>,
    settings: AcquisitionSettings,
    commands: mpsc::Receiver<Command>,
    latest: watch::Sender<Option<Snapshot>>,
}

impl AcquisitionLoop {
    /// Start `source` and run the loop on a new thread.
    ///
    /// # Errors
    ///
    /// Returns the source's error if it cannot be started, or
    /// [`CalError::Channel`] if the thread cannot be spawned.
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        settings: AcquisitionSettings,
    ) -> Result<AcquisitionHandle, CalError> {
        source.start()?;
        let id = source.id().to_string();
        let (command_tx, commands) = mpsc::channel();
        let (latest, latest_rx) = watch::channel(None);

        let worker = Self {
            source,
            settings,
            commands,
            latest,
        };
        let thread = thread::Builder::new()
            .name(format!("acquisition-{id}"))
            .spawn(move || worker.run())
            .map_err(|e| CalError::Channel(format!("cannot spawn acquisition thread: {e}")))?;

        info!(source = %id, "acquisition started");
        Ok(AcquisitionHandle {
            id,
            commands: command_tx,
            latest: latest_rx,
            thread: Some(thread),
        })
    }

    fn run(mut self) -> Box<dyn FrameSource> {
        let mut analyzer = FrameAnalyzer::new(self.settings.analyzer, Instant::now());
        let mut recovery = TimeoutRecovery::default();

        while let Some(config) = self.drain_commands() {
            if let Some(config) = config {
                analyzer.set_config(config);
            }

            match self.source.acquire() {
                Ok(Acquisition::Frame(raw)) => {
                    let frame = decimate_columns(raw, self.settings.column_stride);
                    let analyzed = analyzer.analyze(frame.view(), Instant::now());
                    self.latest.send_replace(Some(Snapshot {
                        sequence: analyzer.frames(),
                        measurement: analyzed.measurement,
                        frame: Arc::new(analyzed),
                    }));
                }
                Ok(Acquisition::TimedOut) => {
                    warn!(
                        source = self.source.id(),
                        timeouts = self.source.timeouts(),
                        "frame timeout"
                    );
                }
                Err(e) => {
                    warn!(source = self.source.id(), error = %e, "acquisition failed");
                    thread::sleep(ERROR_BACKOFF);
                }
            }

            if recovery.observe(self.source.timeouts()) == RecoveryAction::Restart {
                debug!(
                    source = self.source.id(),
                    recovering = recovery.is_recovering(),
                    "restarting grabber"
                );
                if let Err(e) = self.source.restart_after_timeout() {
                    warn!(source = self.source.id(), error = %e, "grabber restart failed");
                }
            }

            if !self.settings.frame_interval.is_zero() {
                thread::sleep(self.settings.frame_interval);
            }
        }

        if let Err(e) = self.source.stop() {
            warn!(source = self.source.id(), error = %e, "could not stop acquisition");
        }
        info!(source = self.source.id(), frames = analyzer.frames(), "acquisition stopped");
        self.source
    }

    /// Empty the command queue.  `None` means stop; otherwise the last
    /// configuration received, if any.
    fn drain_commands(&self) -> Option<Option<AnalyzerConfig>> {
        let mut config = None;
        loop {
            match self.commands.try_recv() {
                Ok(Command::Configure(c)) => config = Some(c),
                Ok(Command::Stop) | Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => return Some(config),
            }
        }
    }
}

/// Owner-side handle to a running acquisition thread.
///
/// Dropping the handle stops the thread and waits for it.
pub struct AcquisitionHandle {
    id: String,
    commands: mpsc::Sender<Command>,
    latest: watch::Receiver<Option<Snapshot>>,
    thread: Option<JoinHandle<Box<dyn FrameSource>>>,
}

impl std::fmt::Debug for AcquisitionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionHandle")
            .field("id", &self.id)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl AcquisitionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a configuration replacement.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::Channel`] when the worker has exited.
    pub fn configure(&self, config: AnalyzerConfig) -> Result<(), CalError> {
        self.commands
            .send(Command::Configure(config))
            .map_err(|_| CalError::Channel(format!("acquisition '{}' has stopped", self.id)))
    }

    /// The most recent snapshot, if any frame has been analysed.
    pub fn latest(&self) -> Option<Snapshot> {
        self.latest.borrow().clone()
    }

    /// A receiver notified on every new snapshot (display channel).
    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot>> {
        self.latest.clone()
    }

    /// Stop the worker and take the frame source back.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::Channel`] if the worker thread panicked.
    pub fn stop(mut self) -> Result<Box<dyn FrameSource>, CalError> {
        self.shutdown()
            .ok_or_else(|| CalError::Channel(format!("acquisition '{}' panicked", self.id)))
    }

    fn shutdown(&mut self) -> Option<Box<dyn FrameSource>> {
        let thread = self.thread.take()?;
        // The worker may already have exited; a failed send is fine.
        let _ = self.commands.send(Command::Stop);
        thread.join().ok()
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        if self.thread.is_some() && self.shutdown().is_none() {
            warn!(source = %self.id, "acquisition thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lasercal_hal::sim::SimFrameSource;
    use lasercal_types::Roi;
    use std::sync::Mutex;

    fn small_source() -> SimFrameSource {
        SimFrameSource::new("cam")
            .with_frame_size(64, 128)
            .with_spot(40, 20, 30, 12)
            .with_blink_half_period(0)
    }

    fn settings() -> AcquisitionSettings {
        AcquisitionSettings {
            frame_interval: Duration::from_millis(1),
            ..AcquisitionSettings::default()
        }
    }

    /// Poll `handle` until `pred` holds for the latest snapshot.
    fn wait_for(handle: &AcquisitionHandle, pred: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(snap) = handle.latest().filter(|s| pred(s)) {
                return snap;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("no matching snapshot within 5 s");
    }

    #[test]
    fn recovery_restarts_twice_per_timeout_burst() {
        let mut recovery = TimeoutRecovery::default();
        let actions: Vec<RecoveryAction> = [0, 1, 1, 1, 2, 3, 3, 3]
            .into_iter()
            .map(|t| recovery.observe(t))
            .collect();
        use RecoveryAction::{None as N, Restart as R};
        assert_eq!(actions, vec![N, R, R, N, R, R, R, N]);
        assert!(!recovery.is_recovering());
    }

    #[test]
    fn worker_publishes_decimated_measurements() {
        let handle = AcquisitionLoop::spawn(Box::new(small_source()), settings()).unwrap();
        let first = wait_for(&handle, |_| true);
        assert_eq!(first.frame.annotated.width(), 64);
        assert_eq!(first.frame.annotated.height(), 64);

        let later = wait_for(&handle, |s| s.sequence > first.sequence + 2);
        assert!(later.measurement.on);
        assert_eq!(later.values().len(), 5);
        // Spot spans decimated columns 20..35.
        assert!((15..=20).contains(&later.measurement.xpos));

        let source = handle.stop().unwrap();
        assert_eq!(source.id(), "cam");
    }

    #[test]
    fn configuration_applies_between_frames() {
        let handle = AcquisitionLoop::spawn(Box::new(small_source()), settings()).unwrap();
        wait_for(&handle, |s| s.measurement.on);

        let away = AnalyzerConfig {
            roi: Roi {
                x_min: 45,
                x_max: 64,
                y_min: 40,
                y_max: 64,
            },
            ..AnalyzerConfig::default()
        };
        handle.configure(away).unwrap();
        let snap = wait_for(&handle, |s| s.frame.roi == away.roi);
        assert!(!snap.measurement.on);
        assert_eq!(snap.measurement.power, 0.0);
    }

    #[test]
    fn subscribers_see_new_snapshots() {
        let handle = AcquisitionLoop::spawn(Box::new(small_source()), settings()).unwrap();
        let mut rx = handle.subscribe();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let seen = runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), rx.changed())
                .await
                .is_ok()
        });
        assert!(seen);
        assert!(rx.borrow().is_some());
    }

    /// Times out on every acquisition and counts restarts.
    struct DeadGrabber {
        timeouts: u64,
        restarts: Arc<Mutex<u32>>,
        stopped: Arc<Mutex<bool>>,
    }

    impl FrameSource for DeadGrabber {
        fn id(&self) -> &str {
            "dead"
        }

        fn start(&mut self) -> Result<(), CalError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CalError> {
            *self.stopped.lock().unwrap() = true;
            Ok(())
        }

        fn acquire(&mut self) -> Result<Acquisition, CalError> {
            self.timeouts += 1;
            Ok(Acquisition::TimedOut)
        }

        fn timeouts(&self) -> u64 {
            self.timeouts
        }

        fn restart_after_timeout(&mut self) -> Result<(), CalError> {
            *self.restarts.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn timeouts_restart_the_grabber_without_publishing() {
        let restarts = Arc::new(Mutex::new(0));
        let stopped = Arc::new(Mutex::new(false));
        let grabber = DeadGrabber {
            timeouts: 0,
            restarts: Arc::clone(&restarts),
            stopped: Arc::clone(&stopped),
        };
        let handle = AcquisitionLoop::spawn(Box::new(grabber), settings()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while *restarts.lock().unwrap() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(*restarts.lock().unwrap() >= 3);
        assert!(handle.latest().is_none());

        drop(handle);
        assert!(*stopped.lock().unwrap());
    }

    #[test]
    fn command_queue_closes_when_worker_exits() {
        let handle = AcquisitionLoop::spawn(Box::new(small_source()), settings()).unwrap();
        let commands = handle.commands.clone();
        let _source = handle.stop().unwrap();
        assert!(commands.send(Command::Stop).is_err());
    }
}
