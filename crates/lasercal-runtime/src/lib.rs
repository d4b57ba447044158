//! `lasercal-runtime` – scan orchestration and camera acquisition.
//!
//! # Modules
//!
//! - [`scan`] – [`ScanController`][scan::ScanController]: the tick-driven
//!   grid-scan state machine, its settings, cancellation and report.
//! - [`table`] – [`ResultTable`][table::ResultTable]: captured rows and their
//!   CSV serialisation.
//! - [`acquisition`] – [`AcquisitionLoop`][acquisition::AcquisitionLoop]: the
//!   dedicated frame-grabbing thread with command queue, latest-snapshot slot
//!   and two-phase timeout recovery.
//! - [`camera_sensor`] – [`CameraSensor`][camera_sensor::CameraSensor]: the
//!   acquisition worker behind the [`Sensor`][lasercal_hal::Sensor] protocol.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   subscriber with optional OTLP export.

pub mod acquisition;
pub mod camera_sensor;
pub mod scan;
pub mod table;
pub mod telemetry;

pub use acquisition::{
    AcquisitionHandle, AcquisitionLoop, AcquisitionSettings, Command, Snapshot, TimeoutRecovery,
};
pub use camera_sensor::CameraSensor;
pub use scan::{
    CancelToken, CaptureWindow, OnGotoFailure, ScanController, ScanOutcome, ScanReport,
    ScanSettings,
};
pub use table::{CsvFormat, ResultTable};
pub use telemetry::{TracerProviderGuard, init_tracing};
