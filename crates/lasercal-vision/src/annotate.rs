//! Display overlay for analysed frames.

use ndarray::{Array3, ArrayView2};

pub type Rgb = [u8; 3];

pub const ROI_COLOUR: Rgb = [0, 0, 255];
pub const BLOB_COLOUR: Rgb = [255, 255, 0];
pub const AGGREGATE_COLOUR: Rgb = [255, 0, 0];
/// Colour channel the edge mask is painted into.
pub const EDGE_CHANNEL: usize = 2;

/// An RGB image indexed `[row, column, channel]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedFrame {
    pixels: Array3<u8>,
}

impl AnnotatedFrame {
    /// Grey RGB copy of a raw frame; intensities above 255 saturate.
    pub fn from_grey(frame: ArrayView2<'_, u16>) -> Self {
        let (rows, cols) = frame.dim();
        let pixels = Array3::from_shape_fn((rows, cols, 3), |(y, x, _)| {
            frame[[y, x]].min(255) as u8
        });
        Self { pixels }
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    pub fn into_pixels(self) -> Array3<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        if y >= self.height() || x >= self.width() {
            return None;
        }
        Some([
            self.pixels[[y, x, 0]],
            self.pixels[[y, x, 1]],
            self.pixels[[y, x, 2]],
        ])
    }

    fn put(&mut self, x: i64, y: i64, colour: Rgb) {
        if x < 0 || y < 0 {
            return;
        }
        let (x, y) = (x as usize, y as usize);
        if y < self.height() && x < self.width() {
            for (c, value) in colour.into_iter().enumerate() {
                self.pixels[[y, x, c]] = value;
            }
        }
    }

    /// One-pixel rectangle outline with inclusive corners, clipped to the
    /// image.  Only the visible part of each edge is walked.
    pub fn draw_rect(&mut self, (x0, y0): (i32, i32), (x1, y1): (i32, i32), colour: Rgb) {
        let (left, right) = (i64::from(x0.min(x1)), i64::from(x0.max(x1)));
        let (top, bottom) = (i64::from(y0.min(y1)), i64::from(y0.max(y1)));
        let (width, height) = (self.width() as i64, self.height() as i64);
        for x in left.max(0)..=right.min(width - 1) {
            self.put(x, top, colour);
            self.put(x, bottom, colour);
        }
        for y in top.max(0)..=bottom.min(height - 1) {
            self.put(left, y, colour);
            self.put(right, y, colour);
        }
    }

    /// Write `mask` into `channel` with its top-left at (`x`, `y`): 255 for
    /// set pixels, 0 otherwise.
    pub fn paint_mask(
        &mut self,
        mask: ArrayView2<'_, bool>,
        (x, y): (usize, usize),
        channel: usize,
    ) {
        let (rows, cols) = mask.dim();
        for r in 0..rows {
            for c in 0..cols {
                let (py, px) = (y + r, x + c);
                if py < self.height() && px < self.width() {
                    self.pixels[[py, px, channel]] = if mask[[r, c]] { 255 } else { 0 };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn grey_conversion_saturates() {
        let frame = Array2::from_shape_vec((1, 2), vec![10u16, 4000]).unwrap();
        let img = AnnotatedFrame::from_grey(frame.view());
        assert_eq!(img.pixel(0, 0), Some([10, 10, 10]));
        assert_eq!(img.pixel(1, 0), Some([255, 255, 255]));
        assert_eq!(img.pixel(2, 0), None);
    }

    #[test]
    fn rectangle_is_clipped_outline() {
        let mut img = AnnotatedFrame::from_grey(Array2::zeros((6, 6)).view());
        img.draw_rect((1, 1), (8, 4), ROI_COLOUR);
        assert_eq!(img.pixel(1, 1), Some(ROI_COLOUR));
        assert_eq!(img.pixel(5, 4), Some(ROI_COLOUR));
        assert_eq!(img.pixel(1, 3), Some(ROI_COLOUR));
        // Interior untouched.
        assert_eq!(img.pixel(3, 2), Some([0, 0, 0]));
    }

    #[test]
    fn mask_goes_into_one_channel() {
        let mut img = AnnotatedFrame::from_grey(Array2::from_elem((4, 4), 7u16).view());
        let mut mask = Array2::from_elem((2, 2), false);
        mask[[0, 1]] = true;
        img.paint_mask(mask.view(), (1, 1), EDGE_CHANNEL);
        assert_eq!(img.pixel(2, 1), Some([7, 7, 255]));
        assert_eq!(img.pixel(1, 1), Some([7, 7, 0]));
        assert_eq!(img.pixel(0, 0), Some([7, 7, 7]));
    }

    #[test]
    fn rectangle_with_extreme_corners_is_clipped() {
        let mut img = AnnotatedFrame::from_grey(Array2::zeros((4, 5)).view());
        img.draw_rect((i32::MIN, 2), (i32::MAX, i32::MAX), BLOB_COLOUR);
        assert_eq!(img.pixel(0, 2), Some(BLOB_COLOUR));
        assert_eq!(img.pixel(4, 2), Some(BLOB_COLOUR));
        assert_eq!(img.pixel(2, 3), Some([0, 0, 0]));
        assert_eq!(img.pixel(2, 1), Some([0, 0, 0]));

        let before = img.clone();
        img.draw_rect((100, 100), (200, 200), ROI_COLOUR);
        assert_eq!(img, before);
    }
}
