//! Smoothing and gradient filters over single-channel images.
//!
//! Every filter mirrors the image at its edges without repeating the edge
//! pixel (`dcb|abcd|cba`), so the output always has the input's shape.

use ndarray::{Array2, ArrayView2, Zip};

/// Side length of the square smoothing window.
pub const BLUR_SIZE: usize = 7;
/// Scale applied to raw 5×5 Sobel responses before 8-bit conversion.
pub const SOBEL_SCALE: f64 = 0.1;

const SOBEL_DERIVATIVE: [f64; 5] = [-1.0, -2.0, 0.0, 2.0, 1.0];
const SOBEL_SMOOTHING: [f64; 5] = [1.0, 4.0, 6.0, 4.0, 1.0];

/// Direction along which a 1-D kernel is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Along a row (x).
    Horizontal,
    /// Along a column (y).
    Vertical,
}

/// Map an out-of-range index back into `0..n` by mirroring about the edge
/// pixels.
pub(crate) fn reflect101(mut i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Correlate `src` with a centred 1-D `kernel` along `direction`.
pub fn correlate(src: ArrayView2<'_, f64>, kernel: &[f64], direction: Direction) -> Array2<f64> {
    let (rows, cols) = src.dim();
    let radius = (kernel.len() / 2) as isize;
    Array2::from_shape_fn((rows, cols), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, w)| {
                let offset = k as isize - radius;
                let value = match direction {
                    Direction::Horizontal => src[[y, reflect101(x as isize + offset, cols)]],
                    Direction::Vertical => src[[reflect101(y as isize + offset, rows), x]],
                };
                w * value
            })
            .sum()
    })
}

/// Normalised `size`×`size` box filter, rounded back to integer intensities.
pub fn box_blur(src: ArrayView2<'_, u16>, size: usize) -> Array2<f64> {
    let size = size.max(1);
    let kernel = vec![1.0 / size as f64; size];
    let image = src.mapv(f64::from);
    let horizontal = correlate(image.view(), &kernel, Direction::Horizontal);
    correlate(horizontal.view(), &kernel, Direction::Vertical).mapv(f64::round)
}

/// First derivative along `direction` with a 5×5 Sobel kernel, scaled by
/// [`SOBEL_SCALE`].
pub fn sobel(src: ArrayView2<'_, f64>, direction: Direction) -> Array2<f64> {
    let (first, second) = match direction {
        Direction::Horizontal => (Direction::Horizontal, Direction::Vertical),
        Direction::Vertical => (Direction::Vertical, Direction::Horizontal),
    };
    let derivative = correlate(src, &SOBEL_DERIVATIVE, first);
    correlate(derivative.view(), &SOBEL_SMOOTHING, second).mapv(|v| v * SOBEL_SCALE)
}

/// Absolute gradient saturated into `0..=255`.
pub fn gradient_to_u8(value: f64) -> u8 {
    // `as` saturates float-to-int conversions.
    value.abs() as u8
}

/// Binary edge mask of an intensity image.
///
/// The image is box-blurred, both Sobel gradients are taken and converted to
/// 8 bits, and a pixel is an edge when either component exceeds `threshold`.
pub fn edge_mask(src: ArrayView2<'_, u16>, threshold: i32) -> Array2<bool> {
    let smoothed = box_blur(src, BLUR_SIZE);
    let gx = sobel(smoothed.view(), Direction::Horizontal);
    let gy = sobel(smoothed.view(), Direction::Vertical);
    Zip::from(&gx).and(&gy).map_collect(|&x, &y| {
        i32::from(gradient_to_u8(x)) > threshold || i32::from(gradient_to_u8(y)) > threshold
    })
}
