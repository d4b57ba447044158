//! Outer contours of blobs in a binary mask.
//!
//! Foreground pixels are grouped 8-connected, background pixels
//! 4-connected.  Only *external* blobs are reported: a blob that lies inside
//! a hole of another blob is skipped, and holes themselves are never traced.
//! Each contour is the blob's outer border, followed counter-clockwise (as
//! seen on screen) from its first pixel in raster order, with straight runs
//! compressed to their end points.

use ndarray::{Array2, ArrayView2};

/// Neighbour offsets `(dy, dx)`, counter-clockwise on screen starting east.
const NEIGHBOURS: [(isize, isize); 8] = [
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
];
const WEST: usize = 4;

/// A pixel position `(x, y)`.
pub type Point = (i32, i32);

/// Axis-aligned bounding rectangle with inclusive extent, i.e. a single pixel
/// has `width == height == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingRect {
    /// Smallest rectangle containing every point, or `None` for no points.
    pub fn of_points(points: &[Point]) -> Option<Self> {
        let (&(x0, y0), rest) = points.split_first()?;
        let (mut x_min, mut y_min, mut x_max, mut y_max) = (x0, y0, x0, y0);
        for &(x, y) in rest {
            x_min = x_min.min(x);
            y_min = y_min.min(y);
            x_max = x_max.max(x);
            y_max = y_max.max(y);
        }
        Some(Self {
            x: x_min,
            y: y_min,
            width: x_max - x_min + 1,
            height: y_max - y_min + 1,
        })
    }

    pub fn area(&self) -> i32 {
        self.width * self.height
    }

    /// The same rectangle shifted by `(dx, dy)`.
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..self
        }
    }
}

/// The outer border of one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<Point>,
}

impl Contour {
    pub fn bounding_rect(&self) -> BoundingRect {
        BoundingRect::of_points(&self.points).unwrap_or_default()
    }

    /// Area enclosed by the contour polygon.
    pub fn area(&self) -> f64 {
        polygon_area(&self.points)
    }
}

/// Absolute shoelace area of the closed polygon through `points`.
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(&(x0, y0), &(x1, y1))| {
            i64::from(x0) * i64::from(y1) - i64::from(x1) * i64::from(y0)
        })
        .sum();
    twice.abs() as f64 / 2.0
}

/// Outer contours of every external blob in `mask`, in raster order of each
/// blob's first pixel.
pub fn find_external_contours(mask: ArrayView2<'_, bool>) -> Vec<Contour> {
    let (rows, cols) = mask.dim();
    let outside = outside_background(mask);
    let mut labelled = Array2::from_elem((rows, cols), false);
    let mut contours = Vec::new();

    for y in 0..rows {
        for x in 0..cols {
            if !mask[[y, x]] || labelled[[y, x]] {
                continue;
            }
            // (y, x) is the first pixel of a new blob in raster order.
            if flood_blob(mask, &outside, &mut labelled, (y, x)) {
                let border = trace_outer_border(mask, (y, x));
                contours.push(Contour {
                    points: compress_runs(&border),
                });
            }
        }
    }
    contours
}

/// Background pixels 4-connected to the image border.
fn outside_background(mask: ArrayView2<'_, bool>) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut outside = Array2::from_elem((rows, cols), false);
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for y in 0..rows {
        for x in 0..cols {
            let on_border = y == 0 || x == 0 || y + 1 == rows || x + 1 == cols;
            if on_border && !mask[[y, x]] {
                stack.push((y, x));
            }
        }
    }

    while let Some((y, x)) = stack.pop() {
        if outside[[y, x]] || mask[[y, x]] {
            continue;
        }
        outside[[y, x]] = true;
        for (dy, dx) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
            if let Some((ny, nx)) = step((y, x), (dy, dx), rows, cols) {
                if !outside[[ny, nx]] && !mask[[ny, nx]] {
                    stack.push((ny, nx));
                }
            }
        }
    }
    outside
}

/// Label the 8-connected blob containing `seed` and report whether it borders
/// the outside region (or the image edge).
fn flood_blob(
    mask: ArrayView2<'_, bool>,
    outside: &Array2<bool>,
    labelled: &mut Array2<bool>,
    seed: (usize, usize),
) -> bool {
    let (rows, cols) = mask.dim();
    let mut external = false;
    let mut stack = vec![seed];

    while let Some((y, x)) = stack.pop() {
        if labelled[[y, x]] || !mask[[y, x]] {
            continue;
        }
        labelled[[y, x]] = true;

        for (dy, dx) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
            match step((y, x), (dy, dx), rows, cols) {
                None => external = true,
                Some((ny, nx)) if outside[[ny, nx]] => external = true,
                Some(_) => {}
            }
        }
        for &offset in &NEIGHBOURS {
            if let Some((ny, nx)) = step((y, x), offset, rows, cols) {
                if mask[[ny, nx]] && !labelled[[ny, nx]] {
                    stack.push((ny, nx));
                }
            }
        }
    }
    external
}

/// Follow the outer border of the blob whose raster-first pixel is `start`.
fn trace_outer_border(mask: ArrayView2<'_, bool>, start: (usize, usize)) -> Vec<Point> {
    let (rows, cols) = mask.dim();
    let is_set = |p: (usize, usize), dir: usize| -> Option<(usize, usize)> {
        step(p, NEIGHBOURS[dir], rows, cols).filter(|&(y, x)| mask[[y, x]])
    };
    let as_point = |(y, x): (usize, usize)| (x as i32, y as i32);

    // Clockwise search from the west neighbour for the first set pixel.
    let first = (0..8)
        .map(|k| (WEST + 8 - k) % 8)
        .find_map(|dir| is_set(start, dir));
    let Some(second) = first else {
        return vec![as_point(start)];
    };

    let mut points = Vec::new();
    let mut previous = second;
    let mut current = start;
    loop {
        // Counter-clockwise search starting just after the previous pixel.
        let back = direction_between(current, previous);
        let next = (1..=8)
            .map(|k| (back + k) % 8)
            .find_map(|dir| is_set(current, dir));
        let Some(next) = next else {
            points.push(as_point(current));
            break;
        };
        points.push(as_point(current));
        if next == start && current == second {
            break;
        }
        previous = current;
        current = next;
    }
    points
}

/// Drop every point that lies on a straight run between its neighbours.
fn compress_runs(points: &[Point]) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    (0..n)
        .filter(|&i| {
            let (px, py) = points[(i + n - 1) % n];
            let (cx, cy) = points[i];
            let (nx, ny) = points[(i + 1) % n];
            (cx - px, cy - py) != (nx - cx, ny - cy)
        })
        .map(|i| points[i])
        .collect()
}

fn direction_between(from: (usize, usize), to: (usize, usize)) -> usize {
    let dy = to.0 as isize - from.0 as isize;
    let dx = to.1 as isize - from.1 as isize;
    NEIGHBOURS
        .iter()
        .position(|&o| o == (dy, dx))
        .unwrap_or(WEST)
}

fn step(
    (y, x): (usize, usize),
    (dy, dx): (isize, isize),
    rows: usize,
    cols: usize,
) -> Option<(usize, usize)> {
    let ny = y.checked_add_signed(dy)?;
    let nx = x.checked_add_signed(dx)?;
    (ny < rows && nx < cols).then_some((ny, nx))
}
