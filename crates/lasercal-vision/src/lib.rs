//! `lasercal-vision` – beam detection on raw camera frames.
//!
//! Turns a single-channel intensity frame into a
//! [`FrameMeasurement`][lasercal_types::FrameMeasurement] (position, power,
//! modulation frequency, frame rate) plus an annotated RGB copy for display.
//!
//! # Modules
//!
//! - [`analyzer`] – [`FrameAnalyzer`][analyzer::FrameAnalyzer]: the stateful
//!   per-frame pipeline and the region-of-interest repair rule.
//! - [`filter`] – box blur, 5×5 Sobel gradients and edge binarisation.
//! - [`contour`] – external blob contours, bounding rectangles and polygon
//!   area.
//! - [`timing`] – frame-rate meter and rising-edge frequency estimator.
//! - [`annotate`] – [`AnnotatedFrame`][annotate::AnnotatedFrame] overlay.

pub mod analyzer;
pub mod annotate;
pub mod contour;
pub mod filter;
pub mod timing;

pub use analyzer::{AnalyzedFrame, FrameAnalyzer, repair_roi};
pub use annotate::AnnotatedFrame;
pub use contour::{BoundingRect, Contour};
