//! Frame normalisation.
//!
//! A capture is reduced to one intensity channel (the mean of R, G and B
//! scaled to `[0, 1]`) and box-blurred with a radius of one percent of the
//! frame width so that sensor noise does not register as change.

use thiserror::Error;
use warden_hal::CameraFrame;
use warden_types::IntensityGrid;

/// Errors raised while preparing or comparing frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB24")]
    BadBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("frame shapes differ: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("frame {rows}x{cols} is smaller than the {tiles}x{tiles} tile grid")]
    TooSmall { rows: usize, cols: usize, tiles: usize },
}

/// Convert an RGB24 frame into an unblurred intensity grid.
///
/// # Errors
///
/// Returns [`FrameError::BadBuffer`] when the buffer length does not match
/// the frame dimensions.
pub fn to_intensity(frame: &CameraFrame) -> Result<IntensityGrid, FrameError> {
    let (width, height) = (frame.width as usize, frame.height as usize);
    let expected = width * height * 3;
    if frame.data.len() != expected {
        return Err(FrameError::BadBuffer {
            width: frame.width,
            height: frame.height,
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(IntensityGrid::from_fn(height, width, |r, c| {
        let px = &frame.data[(r * width + c) * 3..(r * width + c) * 3 + 3];
        (px[0] as f32 + px[1] as f32 + px[2] as f32) / (3.0 * 255.0)
    }))
}

/// Separable box blur with a `(2 * radius + 1)` window, clamping at the
/// edges.  A radius of zero returns the grid unchanged.
pub fn box_blur(grid: &IntensityGrid, radius: usize) -> IntensityGrid {
    if radius == 0 || grid.rows() == 0 || grid.cols() == 0 {
        return grid.clone();
    }
    let (rows, cols) = grid.shape();
    let window = (2 * radius + 1) as f32;
    let r = radius as isize;

    let horizontal = IntensityGrid::from_fn(rows, cols, |row, col| {
        (-r..=r)
            .map(|d| grid.get(row, clamp(col as isize + d, cols)))
            .sum::<f32>()
            / window
    });
    IntensityGrid::from_fn(rows, cols, |row, col| {
        (-r..=r)
            .map(|d| horizontal.get(clamp(row as isize + d, rows), col))
            .sum::<f32>()
            / window
    })
}

fn clamp(idx: isize, len: usize) -> usize {
    idx.clamp(0, len as isize - 1) as usize
}

/// Full capture pipeline: intensity conversion then a box blur of radius
/// `width / 100`.
///
/// # Errors
///
/// See [`to_intensity`].
pub fn normalize(frame: &CameraFrame) -> Result<IntensityGrid, FrameError> {
    let grid = to_intensity(frame)?;
    Ok(box_blur(&grid, frame.width as usize / 100))
}
