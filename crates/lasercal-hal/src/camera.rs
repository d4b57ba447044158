//! `FrameSource` trait and supporting types for frame-grabbing hardware.
//!
//! Only the acquisition worker in `lasercal-runtime` may call these methods;
//! it owns the source exclusively for the lifetime of the stream.

use lasercal_types::CalError;
use ndarray::{Array2, s};

/// A raw single-channel intensity frame, indexed `[row, column]`.
pub type RawFrame = Array2<u16>;

/// Outcome of one acquisition call.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    /// A complete frame arrived.
    Frame(RawFrame),
    /// The grabber timed out waiting for a frame.
    TimedOut,
}

/// A streaming camera or frame grabber.
pub trait FrameSource: Send {
    /// Stable identifier for this source, e.g. `"cameralink0"`.
    fn id(&self) -> &str;

    /// Start continuous acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] if the stream cannot be started.
    fn start(&mut self) -> Result<(), CalError>;

    /// Halt continuous acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] if the stream cannot be stopped.
    fn stop(&mut self) -> Result<(), CalError>;

    /// Wait for the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] when the device is gone; ordinary
    /// timeouts are reported as [`Acquisition::TimedOut`].
    fn acquire(&mut self) -> Result<Acquisition, CalError>;

    /// Cumulative number of timeouts since the source was opened.
    fn timeouts(&self) -> u64;

    /// Re-arm the grabber after a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] if the restart command fails.
    fn restart_after_timeout(&mut self) -> Result<(), CalError>;
}

/// Keep every `stride`-th column of `frame`, starting at column zero.
///
/// A stride of 0 or 1 returns the frame unchanged.
pub fn decimate_columns(frame: RawFrame, stride: usize) -> RawFrame {
    if stride <= 1 {
        return frame;
    }
    frame.slice(s![.., ..;stride]).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockGrabber {
        id: String,
        timeouts: u64,
    }

    impl FrameSource for MockGrabber {
        fn id(&self) -> &str {
            &self.id
        }

        fn start(&mut self) -> Result<(), CalError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CalError> {
            Ok(())
        }

        fn acquire(&mut self) -> Result<Acquisition, CalError> {
            Ok(Acquisition::Frame(Array2::zeros((2, 4))))
        }

        fn timeouts(&self) -> u64 {
            self.timeouts
        }

        fn restart_after_timeout(&mut self) -> Result<(), CalError> {
            Ok(())
        }
    }

    #[test]
    fn mock_grabber_acquire() {
        let mut grabber = MockGrabber {
            id: "grabber".to_string(),
            timeouts: 0,
        };
        assert_eq!(grabber.id(), "grabber");
        grabber.start().unwrap();
        match grabber.acquire().unwrap() {
            Acquisition::Frame(frame) => assert_eq!(frame.dim(), (2, 4)),
            Acquisition::TimedOut => panic!("expected a frame"),
        }
        assert_eq!(grabber.timeouts(), 0);
    }

    #[test]
    fn decimate_keeps_even_columns() {
        let frame = Array2::from_shape_fn((2, 6), |(r, c)| (r * 10 + c) as u16);
        let out = decimate_columns(frame, 2);
        assert_eq!(out.dim(), (2, 3));
        assert_eq!(out[[0, 0]], 0);
        assert_eq!(out[[0, 1]], 2);
        assert_eq!(out[[1, 2]], 14);
    }

    #[test]
    fn decimate_stride_one_is_identity() {
        let frame = Array2::from_shape_fn((3, 3), |(r, c)| (r + c) as u16);
        assert_eq!(decimate_columns(frame.clone(), 1), frame);
    }
}
