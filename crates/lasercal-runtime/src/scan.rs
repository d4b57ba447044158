//! [`ScanController`] – the grid-scan state machine.
//!
//! The controller steps a set of [`Axis`] instances through their point
//! lists.  At every step it waits for motion to finish, settles for
//! `pre_delay`, opens a measurement window (output on, sensor measuring),
//! closes it once the sensor is done, settles for `post_delay` and moves on.
//!
//! ```text
//! BeginStep ──▶ WaitStep ──▶ BeginPreDelay ──▶ WaitPreDelay ──▶ BeginEnable
//!    ▲   │                                                          │
//!    │   └──▶ Done                                                  ▼
//! WaitPostDelay ◀── BeginPostDelay ◀──────────────────────────── WaitEnable
//! ```
//!
//! Every call to [`ScanController::tick_at`] performs at most one transition
//! and never blocks: motion, delays and measurement completion are all
//! discovered by polling on later ticks.  [`ScanController::run`] drives the
//! ticks from a Tokio interval.
//!
//! # Row capture
//!
//! The sensor is read on every tick.  Whether that snapshot becomes a row
//! depends on the [`CaptureWindow`]: by default every tick spent in the
//! settle–measure–settle window produces one.
//!
//! # Ending a scan
//!
//! A scan ends when no axis has a point at the current step
//! ([`ScanOutcome::Completed`]), when a [`CancelToken`] fires
//! ([`ScanOutcome::Cancelled`]), or on a hardware fault the controller cannot
//! continue past ([`ScanOutcome::Aborted`]).  In every case the output is
//! switched off and the rows captured so far are written to the destination,
//! if one is configured.  Only a failure to write that file is returned as an
//! error.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use lasercal_hal::{Axis, OutputDevice, Sensor};
use lasercal_types::{CalError, DataRow, ScanState};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::table::{CsvFormat, ResultTable};

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Which ticks produce a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureWindow {
    /// Every tick in the pre-delay, enable and post-delay states.
    #[default]
    Settle,
    /// Only ticks spent waiting for the sensor in `WaitEnable`.
    Measurement,
}

impl CaptureWindow {
    /// Whether a tick that starts in `state` captures a row.
    pub fn captures(self, state: ScanState) -> bool {
        match self {
            CaptureWindow::Settle => state.in_settle_window(),
            CaptureWindow::Measurement => state == ScanState::WaitEnable,
        }
    }
}

/// What to do when an axis rejects a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnGotoFailure {
    /// Log the failure and keep scanning.
    #[default]
    Proceed,
    /// End the scan with [`ScanOutcome::Aborted`].
    Abort,
}

/// Timing, capture and persistence options for one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanSettings {
    pub pre_delay: Duration,
    pub post_delay: Duration,
    /// CSV file written when the scan ends; `None` keeps rows in memory only.
    pub destination: Option<PathBuf>,
    pub csv: CsvFormat,
    pub capture: CaptureWindow,
    pub on_goto_failure: OnGotoFailure,
}

// ────────────────────────────────────────────────────────────────────────────
// Outcome & cancellation
// ────────────────────────────────────────────────────────────────────────────

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Every axis ran out of points.
    Completed,
    /// A hardware fault stopped the scan at `step`.
    Aborted { step: usize, reason: String },
    /// The scan was cancelled during `step`.
    Cancelled { step: usize },
}

/// Cloneable flag that asks a running scan to stop at its next tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of a finished scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub id: Uuid,
    pub outcome: ScanOutcome,
    /// Number of steps that started moving.
    pub steps: usize,
    pub rows: usize,
    /// File the rows were written to, if any.
    pub path: Option<PathBuf>,
}

// ────────────────────────────────────────────────────────────────────────────
// ScanController
// ────────────────────────────────────────────────────────────────────────────

/// Result of the work done in one state.
enum Transition {
    Stay,
    To(ScanState),
    Finish(ScanOutcome),
}

/// Tick-driven scan orchestrator.
///
/// Owns its axes, sensor and output for the lifetime of the scan so point
/// lists cannot change underneath it.  Use [`into_parts`][Self::into_parts]
/// to get them back afterwards.
pub struct ScanController {
    id: Uuid,
    axes: Vec<Axis>,
    sensor: Box<dyn Sensor>,
    output: Box<dyn OutputDevice>,
    settings: ScanSettings,
    state: ScanState,
    started: bool,
    step: usize,
    steps_started: usize,
    delay_start: Option<Instant>,
    table: ResultTable,
    outcome: Option<ScanOutcome>,
    cancel: CancelToken,
}

impl std::fmt::Debug for ScanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController")
            .field("id", &self.id)
            .field("axes", &self.axes)
            .field("sensor", &self.sensor.id())
            .field("output", &self.output.id())
            .field("state", &self.state)
            .field("step", &self.step)
            .field("rows", &self.table.len())
            .finish()
    }
}

impl ScanController {
    pub fn new(
        axes: Vec<Axis>,
        sensor: Box<dyn Sensor>,
        output: Box<dyn OutputDevice>,
        settings: ScanSettings,
    ) -> Self {
        let axis_names = axes.iter().map(|a| a.name().to_string()).collect();
        let table = ResultTable::new(axis_names, sensor.headers());
        Self {
            id: Uuid::new_v4(),
            axes,
            sensor,
            output,
            settings,
            state: ScanState::BeginStep,
            started: false,
            step: 0,
            steps_started: 0,
            delay_start: None,
            table,
            outcome: None,
            cancel: CancelToken::new(),
        }
    }

    /// Replace the cancellation flag, e.g. with one shared by a signal
    /// handler.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Index of the step currently being executed.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn table(&self) -> &ResultTable {
        &self.table
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// `None` until the scan reaches [`ScanState::Done`].
    pub fn outcome(&self) -> Option<&ScanOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.state == ScanState::Done
    }

    /// Summary of the finished scan; `None` while it is still running.
    pub fn report(&self) -> Option<ScanReport> {
        let outcome = self.outcome.clone()?;
        Some(ScanReport {
            id: self.id,
            outcome,
            steps: self.steps_started,
            rows: self.table.len(),
            path: self.settings.destination.clone(),
        })
    }

    /// Hand back the axes, sensor and output.
    pub fn into_parts(self) -> (Vec<Axis>, Box<dyn Sensor>, Box<dyn OutputDevice>) {
        (self.axes, self.sensor, self.output)
    }

    /// Switch the output off and reset to the first step.
    ///
    /// Called implicitly by the first tick.  Any rows from an earlier run
    /// are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] if the output cannot be switched
    /// off.
    pub fn begin(&mut self) -> Result<(), CalError> {
        self.output.set_enabled(false)?;
        self.table.clear();
        self.state = ScanState::BeginStep;
        self.step = 0;
        self.steps_started = 0;
        self.delay_start = None;
        self.outcome = None;
        self.started = true;
        info!(
            scan = %self.id,
            axes = self.axes.len(),
            sensor = self.sensor.id(),
            output = self.output.id(),
            "scan started"
        );
        Ok(())
    }

    /// [`tick_at`][Self::tick_at] with the current time.
    pub fn tick(&mut self) -> Result<ScanState, CalError> {
        self.tick_at(Instant::now())
    }

    /// Advance the state machine by one tick taken at `now`.
    ///
    /// Returns the state after the tick.  Hardware faults end the scan with
    /// [`ScanOutcome::Aborted`] and are not returned as errors.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::Persistence`] from the tick that finishes the scan
    /// when the rows cannot be written; the state is still
    /// [`ScanState::Done`].
    pub fn tick_at(&mut self, now: Instant) -> Result<ScanState, CalError> {
        if self.state == ScanState::Done {
            return Ok(ScanState::Done);
        }
        if !self.started {
            if let Err(e) = self.begin() {
                return self.abort(e);
            }
        }

        for axis in &mut self.axes {
            axis.service();
        }
        let snapshot = self.sensor.update();

        if self.cancel.is_cancelled() {
            info!(scan = %self.id, step = self.step, "scan cancelled");
            return self.finish(ScanOutcome::Cancelled { step: self.step });
        }

        if self.settings.capture.captures(self.state) {
            let row = DataRow {
                timestamp: Utc::now(),
                axis_values: self.axes.iter().map(Axis::current_value).collect(),
                sensor_values: snapshot,
            };
            if let Err(e) = self.table.push(row) {
                return self.abort(e);
            }
        }

        match self.transition(now) {
            Ok(Transition::Stay) => Ok(self.state),
            Ok(Transition::To(next)) => {
                debug!(from = ?self.state, to = ?next, step = self.step, "scan transition");
                self.state = next;
                Ok(next)
            }
            Ok(Transition::Finish(outcome)) => self.finish(outcome),
            Err(e) => self.abort(e),
        }
    }

    /// Work for the current state.
    fn transition(&mut self, now: Instant) -> Result<Transition, CalError> {
        let next = match self.state {
            ScanState::BeginStep => {
                let mut moved = false;
                for axis in &mut self.axes {
                    let Some(result) = axis.goto_step(self.step) else {
                        continue;
                    };
                    moved = true;
                    if let Err(e) = result {
                        if self.settings.on_goto_failure == OnGotoFailure::Abort {
                            return Err(e);
                        }
                        warn!(
                            axis = axis.name(),
                            step = self.step,
                            error = %e,
                            "continuing after failed move"
                        );
                    }
                }
                if !moved {
                    return Ok(Transition::Finish(ScanOutcome::Completed));
                }
                self.steps_started += 1;
                Some(ScanState::WaitStep)
            }
            ScanState::WaitStep => {
                let step = self.step;
                let arrived = self
                    .axes
                    .iter()
                    .filter(|a| a.point(step).is_some())
                    .all(Axis::is_done);
                arrived.then_some(ScanState::BeginPreDelay)
            }
            ScanState::BeginPreDelay => {
                self.delay_start = Some(now);
                Some(ScanState::WaitPreDelay)
            }
            ScanState::WaitPreDelay => self
                .delay_elapsed(now, self.settings.pre_delay)
                .then_some(ScanState::BeginEnable),
            ScanState::BeginEnable => {
                self.output.set_enabled(true)?;
                self.sensor.begin_measuring()?;
                Some(ScanState::WaitEnable)
            }
            ScanState::WaitEnable => {
                if self.sensor.is_done() {
                    self.output.set_enabled(false)?;
                    Some(ScanState::BeginPostDelay)
                } else {
                    None
                }
            }
            ScanState::BeginPostDelay => {
                self.delay_start = Some(now);
                Some(ScanState::WaitPostDelay)
            }
            ScanState::WaitPostDelay => {
                if self.delay_elapsed(now, self.settings.post_delay) {
                    self.step += 1;
                    Some(ScanState::BeginStep)
                } else {
                    None
                }
            }
            ScanState::Done => None,
        };
        Ok(next.map_or(Transition::Stay, Transition::To))
    }

    fn delay_elapsed(&self, now: Instant, delay: Duration) -> bool {
        self.delay_start
            .is_some_and(|start| now.saturating_duration_since(start) > delay)
    }

    fn abort(&mut self, error: CalError) -> Result<ScanState, CalError> {
        warn!(
            scan = %self.id,
            step = self.step,
            state = ?self.state,
            error = %error,
            "scan aborted"
        );
        self.finish(ScanOutcome::Aborted {
            step: self.step,
            reason: error.to_string(),
        })
    }

    /// Output off, record the outcome, persist.
    fn finish(&mut self, outcome: ScanOutcome) -> Result<ScanState, CalError> {
        if let Err(e) = self.output.set_enabled(false) {
            warn!(output = self.output.id(), error = %e, "could not disable output at scan end");
        }
        self.state = ScanState::Done;
        info!(
            scan = %self.id,
            outcome = ?outcome,
            steps = self.steps_started,
            rows = self.table.len(),
            "scan finished"
        );
        self.outcome = Some(outcome);

        if let Some(path) = &self.settings.destination {
            self.table.write_csv(path, &self.settings.csv)?;
            info!(path = %path.display(), rows = self.table.len(), "results written");
        }
        Ok(ScanState::Done)
    }

    /// Tick every `period` until the scan is done.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::Persistence`] when the rows cannot be written at
    /// the end of the scan.
    pub async fn run(&mut self, period: Duration) -> Result<ScanReport, CalError> {
        let span = info_span!("scan", id = %self.id);
        async {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let tick = interval.tick().await;
                if self.tick_at(tick.into_std())? == ScanState::Done {
                    break;
                }
            }
            Ok::<(), CalError>(())
        }
        .instrument(span)
        .await?;

        self.report().ok_or_else(|| {
            CalError::Channel("scan stopped without an outcome".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lasercal_hal::AxisDriver;
    use lasercal_hal::sim::{SimAxisDriver, SimOutput, SimSensor};
    use lasercal_types::AxisKind;
    use std::sync::Mutex;

    fn axis(name: &str, points: Vec<f64>) -> Axis {
        sim_axis(name, points, SimAxisDriver::new(name))
    }

    fn sim_axis(name: &str, points: Vec<f64>, driver: SimAxisDriver) -> Axis {
        Axis::new(name, AxisKind::Auxiliary, -100.0, 100.0, Box::new(driver))
            .unwrap()
            .with_points(points)
    }

    /// Tick with a 1 ms synthetic clock until done, returning the tick count.
    fn drive(scan: &mut ScanController, limit: usize) -> usize {
        let t0 = Instant::now();
        for i in 0..limit {
            let state = scan.tick_at(t0 + Duration::from_millis(i as u64)).unwrap();
            if state == ScanState::Done {
                return i + 1;
            }
        }
        panic!("scan did not finish within {limit} ticks");
    }

    #[test]
    fn two_axes_three_steps_three_rows() {
        let a = axis("A", vec![0.0, 10.0, 20.0]);
        let b_driver = SimAxisDriver::new("B");
        let b_writes = b_driver.write_log();
        let b = sim_axis("B", vec![5.0, 15.0], b_driver);
        let output = SimOutput::new("laser");
        let history = output.history();
        let settings = ScanSettings {
            capture: CaptureWindow::Measurement,
            ..ScanSettings::default()
        };
        let mut scan = ScanController::new(
            vec![a, b],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(output),
            settings,
        );

        drive(&mut scan, 100);

        let rows: Vec<Vec<f64>> = scan
            .table()
            .rows()
            .iter()
            .map(|r| r.axis_values.clone())
            .collect();
        assert_eq!(rows, vec![vec![0.0, 5.0], vec![10.0, 15.0], vec![20.0, 15.0]]);
        assert_eq!(*b_writes.lock().unwrap(), vec![5.0, 15.0]);

        let report = scan.report().unwrap();
        assert_eq!(report.outcome, ScanOutcome::Completed);
        assert_eq!(report.steps, 3);
        assert_eq!(report.rows, 3);
        assert_eq!(
            *history.lock().unwrap(),
            vec![false, true, false, true, false, true, false, false]
        );
    }

    #[test]
    fn settle_capture_counts_window_ticks() {
        // Sensor takes three updates to finish, so WaitEnable spans ticks.
        let sensor = SimSensor::new("pd", 2).done_after(3);
        let settings = ScanSettings {
            pre_delay: Duration::from_millis(2),
            post_delay: Duration::from_millis(1),
            ..ScanSettings::default()
        };
        let mut scan = ScanController::new(
            vec![axis("x", vec![1.0])],
            Box::new(sensor),
            Box::new(SimOutput::new("out")),
            settings,
        );

        let t0 = Instant::now();
        let mut window_ticks = 0;
        let mut motion_rows = 0;
        for i in 0..100u64 {
            let before = scan.state();
            let rows_before = scan.table().len();
            let after = scan.tick_at(t0 + Duration::from_millis(i)).unwrap();
            let captured = scan.table().len() - rows_before;
            if before.in_settle_window() {
                window_ticks += 1;
                assert_eq!(captured, 1);
            } else {
                motion_rows += captured;
            }
            if after == ScanState::Done {
                break;
            }
        }
        assert_eq!(motion_rows, 0);
        assert_eq!(scan.table().len(), window_ticks);
        assert!(window_ticks > 6);
        assert!(scan.table().rows().iter().all(|r| r.width() == 3));
    }

    #[test]
    fn terminates_after_longest_point_list() {
        let slow = SimAxisDriver::new("slow").with_settle_ticks(3);
        let mut scan = ScanController::new(
            vec![
                axis("a", vec![1.0, 2.0]),
                sim_axis("b", vec![1.0, 2.0, 3.0, 4.0, 5.0], slow),
                axis("c", vec![]),
            ],
            Box::new(SimSensor::new("pd", 1).done_after(2)),
            Box::new(SimOutput::new("out")),
            ScanSettings::default(),
        );
        drive(&mut scan, 500);
        assert_eq!(scan.report().unwrap().steps, 5);
        assert_eq!(scan.step(), 5);
        assert_eq!(scan.axes()[0].current_value(), 2.0);
        assert_eq!(scan.axes()[1].current_value(), 5.0);
    }

    #[test]
    fn no_points_finishes_immediately() {
        let mut scan = ScanController::new(
            vec![axis("x", vec![])],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(SimOutput::new("out")),
            ScanSettings::default(),
        );
        assert_eq!(drive(&mut scan, 5), 1);
        assert!(scan.table().is_empty());
        assert_eq!(scan.report().unwrap().steps, 0);
    }

    #[test]
    fn wait_step_blocks_until_axes_arrive() {
        let slow = SimAxisDriver::new("slow").with_settle_ticks(4);
        let mut scan = ScanController::new(
            vec![sim_axis("x", vec![1.0], slow)],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(SimOutput::new("out")),
            ScanSettings::default(),
        );
        let t0 = Instant::now();
        assert_eq!(scan.tick_at(t0).unwrap(), ScanState::WaitStep);
        // Each tick services the driver once before polling.
        for i in 1..4 {
            assert_eq!(
                scan.tick_at(t0 + Duration::from_millis(i)).unwrap(),
                ScanState::WaitStep
            );
        }
        assert_eq!(
            scan.tick_at(t0 + Duration::from_millis(4)).unwrap(),
            ScanState::BeginPreDelay
        );
        assert!(scan.table().is_empty());
    }

    #[test]
    fn delays_use_strict_comparison() {
        let settings = ScanSettings {
            pre_delay: Duration::from_millis(10),
            ..ScanSettings::default()
        };
        let mut scan = ScanController::new(
            vec![axis("x", vec![1.0])],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(SimOutput::new("out")),
            settings,
        );
        let t0 = Instant::now();
        scan.tick_at(t0).unwrap(); // BeginStep
        scan.tick_at(t0).unwrap(); // WaitStep
        assert_eq!(scan.tick_at(t0).unwrap(), ScanState::WaitPreDelay);
        let at = |ms| t0 + Duration::from_millis(ms);
        assert_eq!(scan.tick_at(at(10)).unwrap(), ScanState::WaitPreDelay);
        assert_eq!(scan.tick_at(at(11)).unwrap(), ScanState::BeginEnable);
    }

    #[test]
    fn failed_move_proceeds_by_default() {
        let broken = SimAxisDriver::new("broken").failing();
        let mut scan = ScanController::new(
            vec![sim_axis("x", vec![1.0, 2.0], broken)],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(SimOutput::new("out")),
            ScanSettings::default(),
        );
        drive(&mut scan, 100);
        assert_eq!(scan.outcome(), Some(&ScanOutcome::Completed));
        assert_eq!(scan.report().unwrap().steps, 2);
    }

    #[test]
    fn failed_move_aborts_when_configured() {
        let broken = SimAxisDriver::new("broken").failing();
        let output = SimOutput::new("out");
        let history = output.history();
        let settings = ScanSettings {
            on_goto_failure: OnGotoFailure::Abort,
            ..ScanSettings::default()
        };
        let mut scan = ScanController::new(
            vec![axis("ok", vec![1.0]), sim_axis("x", vec![1.0], broken)],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(output),
            settings,
        );
        assert_eq!(drive(&mut scan, 10), 1);
        match scan.outcome() {
            Some(ScanOutcome::Aborted { step, reason }) => {
                assert_eq!(*step, 0);
                assert!(reason.contains("broken"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(history.lock().unwrap().last(), Some(&false));
    }

    #[test]
    fn cancel_persists_rows_and_disables_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.csv");
        let output = SimOutput::new("out");
        let history = output.history();
        let settings = ScanSettings {
            destination: Some(path.clone()),
            ..ScanSettings::default()
        };
        let mut scan = ScanController::new(
            vec![axis("x", vec![1.0, 2.0, 3.0])],
            // Never finishes measuring.
            Box::new(SimSensor::new("pd", 1).done_after(u32::MAX)),
            Box::new(output),
            settings,
        );
        let token = scan.cancel_token();

        let t0 = Instant::now();
        for i in 0..20 {
            scan.tick_at(t0 + Duration::from_millis(i)).unwrap();
        }
        assert_eq!(scan.state(), ScanState::WaitEnable);
        let captured = scan.table().len();
        assert!(captured > 0);

        token.cancel();
        assert_eq!(
            scan.tick_at(t0 + Duration::from_millis(20)).unwrap(),
            ScanState::Done
        );
        assert_eq!(scan.outcome(), Some(&ScanOutcome::Cancelled { step: 0 }));
        assert_eq!(history.lock().unwrap().last(), Some(&false));

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), captured);
    }

    #[test]
    fn persistence_failure_is_returned_once_done() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ScanSettings {
            destination: Some(dir.path().join("missing").join("out.csv")),
            ..ScanSettings::default()
        };
        let mut scan = ScanController::new(
            vec![axis("x", vec![])],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(SimOutput::new("out")),
            settings,
        );
        let err = scan.tick_at(Instant::now()).unwrap_err();
        assert!(matches!(err, CalError::Persistence { .. }));
        assert_eq!(scan.state(), ScanState::Done);
        assert_eq!(scan.tick_at(Instant::now()).unwrap(), ScanState::Done);
    }

    /// Reports two headers but returns three values.
    struct LyingSensor;

    impl Sensor for LyingSensor {
        fn id(&self) -> &str {
            "liar"
        }

        fn headers(&self) -> Vec<String> {
            vec!["a".to_string(), "b".to_string()]
        }

        fn update(&mut self) -> Vec<f64> {
            vec![1.0, 2.0, 3.0]
        }
    }

    #[test]
    fn mismatched_snapshot_aborts_scan() {
        let mut scan = ScanController::new(
            vec![axis("x", vec![1.0])],
            Box::new(LyingSensor),
            Box::new(SimOutput::new("out")),
            ScanSettings::default(),
        );
        drive(&mut scan, 10);
        assert!(matches!(scan.outcome(), Some(ScanOutcome::Aborted { .. })));
        assert!(scan.table().is_empty());
    }

    /// Output whose enable command always fails.
    struct StuckOutput {
        commands: Arc<Mutex<Vec<bool>>>,
    }

    impl OutputDevice for StuckOutput {
        fn id(&self) -> &str {
            "stuck"
        }

        fn set_enabled(&mut self, enabled: bool) -> Result<(), CalError> {
            self.commands.lock().unwrap().push(enabled);
            if enabled {
                Err(CalError::hardware("stuck", "interlock open"))
            } else {
                Ok(())
            }
        }

        fn is_enabled(&self) -> bool {
            false
        }
    }

    #[test]
    fn output_fault_aborts_at_enable() {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let mut scan = ScanController::new(
            vec![axis("x", vec![1.0, 2.0])],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(StuckOutput {
                commands: Arc::clone(&commands),
            }),
            ScanSettings::default(),
        );
        drive(&mut scan, 20);
        assert!(matches!(
            scan.outcome(),
            Some(ScanOutcome::Aborted { step: 0, .. })
        ));
        assert_eq!(*commands.lock().unwrap(), vec![false, true, false]);
    }

    #[test]
    fn into_parts_returns_axes_in_order() {
        let scan = ScanController::new(
            vec![axis("a", vec![1.0]), axis("b", vec![2.0])],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(SimOutput::new("out")),
            ScanSettings::default(),
        );
        let (axes, sensor, output) = scan.into_parts();
        let names: Vec<&str> = axes.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(sensor.id(), "pd");
        assert_eq!(output.id(), "out");
    }

    #[test]
    fn axis_driver_service_runs_every_tick() {
        struct Counting(Arc<Mutex<u32>>);
        impl AxisDriver for Counting {
            fn id(&self) -> &str {
                "counting"
            }
            fn write_value(&mut self, _value: f64) -> Result<(), CalError> {
                Ok(())
            }
            fn service(&mut self) {
                *self.0.lock().unwrap() += 1;
            }
        }
        let calls = Arc::new(Mutex::new(0));
        let ax = Axis::new(
            "x",
            AxisKind::Linear,
            0.0,
            1.0,
            Box::new(Counting(Arc::clone(&calls))),
        )
        .unwrap()
        .with_points(vec![0.5]);
        let mut scan = ScanController::new(
            vec![ax],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(SimOutput::new("out")),
            ScanSettings::default(),
        );
        let ticks = drive(&mut scan, 50);
        // Every tick, including the finishing one, services the axis.
        assert_eq!(*calls.lock().unwrap() as usize, ticks);
    }

    #[tokio::test]
    async fn run_drives_scan_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.csv");
        let settings = ScanSettings {
            destination: Some(path.clone()),
            csv: CsvFormat {
                delimiter: b';',
                header: true,
            },
            ..ScanSettings::default()
        };
        let mut scan = ScanController::new(
            vec![axis("x", vec![1.0, 2.0])],
            Box::new(SimSensor::new("pd", 1)),
            Box::new(SimOutput::new("out")),
            settings,
        );
        let report = scan.run(Duration::from_millis(1)).await.unwrap();
        assert_eq!(report.outcome, ScanOutcome::Completed);
        assert_eq!(report.steps, 2);
        assert_eq!(report.path.as_deref(), Some(path.as_path()));

        let written = std::fs::read_to_string(&path).unwrap();
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("timestamp;x;pd 0"));
        assert_eq!(lines.count(), report.rows);
    }
}
