//! [`FrameAnalyzer`] – per-frame beam detection.
//!
//! Each call to [`FrameAnalyzer::analyze`] runs the full pipeline on one
//! frame:
//!
//! 1. update the frame-rate estimate,
//! 2. widen a degenerate region of interest by one pixel per side,
//! 3. crop, blur and threshold the Sobel gradients into an edge mask,
//! 4. trace the outer contours of the edge blobs and drop those whose
//!    bounding box is smaller than `min_blob_area`,
//! 5. merge the surviving contour points into one aggregate whose bounding
//!    box gives the position and whose polygon area gives the power,
//! 6. update the on/off state and, on a rising edge, the frequency.
//!
//! Nothing in the pipeline fails: an empty crop or a frame without blobs
//! produces a zero measurement.

use std::time::Instant;

use lasercal_types::{AnalyzerConfig, FrameMeasurement, Roi};
use ndarray::{ArrayView2, s};
use tracing::{debug, trace};

use crate::annotate::{AGGREGATE_COLOUR, AnnotatedFrame, BLOB_COLOUR, EDGE_CHANNEL, ROI_COLOUR};
use crate::contour::{BoundingRect, Point, find_external_contours, polygon_area};
use crate::filter::edge_mask;
use crate::timing::{CycleDetector, FpsMeter};

/// Output of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedFrame {
    pub measurement: FrameMeasurement,
    /// Grey copy of the frame with the edge mask and detection boxes drawn
    /// on it.
    pub annotated: AnnotatedFrame,
    /// Bounding boxes of the surviving blobs, in full-frame coordinates.
    pub blobs: Vec<BoundingRect>,
    /// Region of interest the frame was analysed with, after repair.
    pub roi: Roi,
}

/// Stateful frame analyser.
///
/// Holds the configuration plus the timing state that spans frames (last
/// frame time, last rising edge).  Not shared: the acquisition worker owns
/// it and replaces the configuration between frames.
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    config: AnalyzerConfig,
    fps: FpsMeter,
    cycle: CycleDetector,
    frames: u64,
}

impl FrameAnalyzer {
    pub fn new(config: AnalyzerConfig, started_at: Instant) -> Self {
        Self {
            config,
            fps: FpsMeter::new(started_at),
            cycle: CycleDetector::new(started_at),
            frames: 0,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Replace the whole configuration.  Takes effect on the next frame.
    pub fn set_config(&mut self, config: AnalyzerConfig) {
        debug!(?config, "analyzer configuration replaced");
        self.config = config;
    }

    /// Number of frames analysed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Run the pipeline on `frame`, captured at `now`.
    pub fn analyze(&mut self, frame: ArrayView2<'_, u16>, now: Instant) -> AnalyzedFrame {
        self.frames += 1;
        let fps = self.fps.tick(now);

        let (rows, cols) = frame.dim();
        let (width, height) = (cols as i32, rows as i32);
        if repair_roi(&mut self.config.roi, width, height) {
            debug!(roi = ?self.config.roi, "widened degenerate region of interest");
        }
        let roi = self.config.roi;

        let x0 = roi.x_min.clamp(0, width);
        let x1 = roi.x_max.clamp(x0, width);
        let y0 = roi.y_min.clamp(0, height);
        let y1 = roi.y_max.clamp(y0, height);

        let mut annotated = AnnotatedFrame::from_grey(frame);
        let mut blobs = Vec::new();
        let mut points: Vec<Point> = Vec::new();

        if x1 > x0 && y1 > y0 {
            let crop = frame.slice(s![y0 as usize..y1 as usize, x0 as usize..x1 as usize]);
            let mask = edge_mask(crop, self.config.threshold);
            annotated.paint_mask(mask.view(), (x0 as usize, y0 as usize), EDGE_CHANNEL);

            for contour in find_external_contours(mask.view()) {
                let rect = contour.bounding_rect();
                if rect.area() < self.config.min_blob_area {
                    continue;
                }
                blobs.push(rect.offset(x0, y0));
                points.extend(contour.points);
            }
        }

        annotated.draw_rect((roi.x_min, roi.y_min), (roi.x_max, roi.y_max), ROI_COLOUR);
        for b in &blobs {
            annotated.draw_rect((b.x, b.y), (b.x + b.width, b.y + b.height), BLOB_COLOUR);
        }

        let (xpos, ypos, power) = match BoundingRect::of_points(&points) {
            Some(rect) => {
                let r = rect.offset(x0, y0);
                annotated.draw_rect((r.x, r.y), (r.x + r.width, r.y + r.height), AGGREGATE_COLOUR);
                (r.x, r.y, polygon_area(&points))
            }
            None => (0, 0, 0.0),
        };

        let on = power > f64::from(self.config.on_threshold);
        self.cycle.observe(on, now);

        let measurement = FrameMeasurement {
            xpos,
            ypos,
            power,
            frequency: self.cycle.frequency(),
            fps,
            on,
        };
        trace!(?measurement, blobs = blobs.len(), "frame analysed");

        AnalyzedFrame {
            measurement,
            annotated,
            blobs,
            roi,
        }
    }
}

/// Widen each degenerate dimension of `roi` by one pixel on both sides,
/// without leaving `0..=width` / `0..=height`.  Returns whether anything
/// changed.
///
/// Spans are measured in `i64`; the bounds arrive unchecked from the
/// configuration channel and may sit anywhere in the `i32` range.
pub fn repair_roi(roi: &mut Roi, width: i32, height: i32) -> bool {
    let before = *roi;
    if i64::from(roi.x_max) - i64::from(roi.x_min) <= 0 {
        if roi.x_max < width {
            roi.x_max += 1;
        }
        if roi.x_min > 0 {
            roi.x_min -= 1;
        }
    }
    if i64::from(roi.y_max) - i64::from(roi.y_min) <= 0 {
        if roi.y_max < height {
            roi.y_max += 1;
        }
        if roi.y_min > 0 {
            roi.y_min -= 1;
        }
    }
    *roi != before
}
