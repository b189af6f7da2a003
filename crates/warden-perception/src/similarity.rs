//! Tiled-statistics frame similarity.
//!
//! Two grids of equal shape are split into `tiles × tiles` blocks.  For each
//! block the population standard deviation of the pixel-wise difference is
//! computed; blocks whose deviation stays under the noise threshold count
//! as "unchanged".  The score is the percentage of unchanged blocks.
//!
//! # Example
//!
//! ```rust
//! use warden_perception::similarity::{SimilarityParams, similarity};
//! use warden_types::IntensityGrid;
//!
//! let a = IntensityGrid::filled(48, 48, 0.5);
//! let b = IntensityGrid::filled(48, 48, 0.9);
//! // A uniform brightness shift has zero deviation in every tile.
//! assert_eq!(similarity(&a, &b, &SimilarityParams::default()).unwrap(), 100);
//! ```

use chrono::NaiveDateTime;
use tracing::{debug, info};
use warden_types::{IntensityGrid, MotionEvent};

use crate::frame::FrameError;

/// Tiling parameters for [`similarity`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityParams {
    /// Tiles per axis.
    pub tiles: usize,
    /// Per-tile deviation below which a tile counts as unchanged.
    pub noise_threshold: f64,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self {
            tiles: 12,
            noise_threshold: 0.014,
        }
    }
}

/// Score the similarity of two grids in `0..=100`.
///
/// Tiles are `rows / tiles` by `cols / tiles` cells; trailing rows and
/// columns that do not fill a whole tile are ignored.
///
/// # Errors
///
/// - [`FrameError::ShapeMismatch`] when the grids differ in shape.
/// - [`FrameError::TooSmall`] when either axis has fewer cells than tiles
///   (this includes `tiles == 0`).
pub fn similarity(
    prev: &IntensityGrid,
    next: &IntensityGrid,
    params: &SimilarityParams,
) -> Result<u8, FrameError> {
    if prev.shape() != next.shape() {
        return Err(FrameError::ShapeMismatch {
            left: prev.shape(),
            right: next.shape(),
        });
    }
    let (rows, cols) = prev.shape();
    let tiles = params.tiles;
    if tiles == 0 || rows < tiles || cols < tiles {
        return Err(FrameError::TooSmall { rows, cols, tiles });
    }

    let (tile_h, tile_w) = (rows / tiles, cols / tiles);
    let mut below = 0usize;
    for ty in 0..tiles {
        for tx in 0..tiles {
            let dev = tile_deviation(prev, next, ty * tile_h, tx * tile_w, tile_h, tile_w);
            if dev < params.noise_threshold {
                below += 1;
            }
        }
    }

    let pct = below as f64 * 100.0 / (tiles * tiles) as f64;
    Ok(pct.round_ties_even() as u8)
}

fn tile_deviation(
    prev: &IntensityGrid,
    next: &IntensityGrid,
    row0: usize,
    col0: usize,
    height: usize,
    width: usize,
) -> f64 {
    let n = (height * width) as f64;
    let diffs = || {
        (row0..row0 + height).flat_map(move |r| {
            (col0..col0 + width).map(move |c| next.get(r, c) as f64 - prev.get(r, c) as f64)
        })
    };
    let mean = diffs().sum::<f64>() / n;
    let var = diffs().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}

// ────────────────────────────────────────────────────────────────────────────
// MotionDetector
// ────────────────────────────────────────────────────────────────────────────

/// Result of comparing a new frame against the previous one.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// No previous frame was stored.
    FirstFrame,
    /// The frames could not be compared.
    Skipped(FrameError),
    /// Similarity stayed at or above the floor.
    Still { score: u8 },
    /// Similarity fell below the floor.
    Motion(MotionEvent),
}

/// Turns similarity scores into [`MotionEvent`]s.
#[derive(Debug, Clone, Copy)]
pub struct MotionDetector {
    params: SimilarityParams,
    similarity_floor: u8,
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new(SimilarityParams::default(), 70)
    }
}

impl MotionDetector {
    pub fn new(params: SimilarityParams, similarity_floor: u8) -> Self {
        Self {
            params,
            similarity_floor,
        }
    }

    pub fn similarity_floor(&self) -> u8 {
        self.similarity_floor
    }

    /// Compare `next` with `prev` (if any) and report what was seen.
    pub fn observe(
        &self,
        prev: Option<&IntensityGrid>,
        next: &IntensityGrid,
        now: NaiveDateTime,
    ) -> Observation {
        let Some(prev) = prev else {
            return Observation::FirstFrame;
        };
        match similarity(prev, next, &self.params) {
            Ok(score) if score < self.similarity_floor => {
                info!(score, floor = self.similarity_floor, "motion detected");
                Observation::Motion(MotionEvent {
                    score,
                    timestamp: now,
                })
            }
            Ok(score) => Observation::Still { score },
            Err(e) => {
                debug!(error = %e, "frame comparison skipped");
                Observation::Skipped(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    /// A 48x48 grid with a noisy checkerboard in the top-left `n` tiles of
    /// the first tile row.
    fn disturbed(n: usize) -> IntensityGrid {
        IntensityGrid::from_fn(48, 48, |r, c| {
            if r < 4 && c < 4 * n && (r + c) % 2 == 0 {
                1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn identical_frames_score_100() {
        let g = IntensityGrid::from_fn(36, 36, |r, c| ((r * c) % 7) as f32 / 7.0);
        assert_eq!(similarity(&g, &g, &SimilarityParams::default()).unwrap(), 100);
    }

    #[test]
    fn changed_tiles_lower_the_score() {
        let base = IntensityGrid::filled(48, 48, 0.0);
        // 12 of 144 tiles disturbed: 132/144 = 91.67 → 92.
        let score = similarity(&base, &disturbed(12), &SimilarityParams::default()).unwrap();
        assert_eq!(score, 92);
    }

    #[test]
    fn half_way_scores_round_to_even() {
        let base = IntensityGrid::filled(48, 48, 0.0);
        // 126 of 144 disturbed: 18/144 = 12.5 → 12.
        let next = IntensityGrid::from_fn(48, 48, |r, c| {
            let tile = (r / 4) * 12 + c / 4;
            if tile >= 18 && (r + c) % 2 == 0 { 1.0 } else { 0.0 }
        });
        assert_eq!(similarity(&base, &next, &SimilarityParams::default()).unwrap(), 12);
    }

    #[test]
    fn remainder_rows_are_ignored() {
        let base = IntensityGrid::filled(50, 50, 0.0);
        // Change only the last two rows and columns, outside the 48x48 tiled area.
        let next = IntensityGrid::from_fn(50, 50, |r, c| {
            if (r >= 48 || c >= 48) && (r + c) % 2 == 0 { 1.0 } else { 0.0 }
        });
        assert_eq!(similarity(&base, &next, &SimilarityParams::default()).unwrap(), 100);
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let a = IntensityGrid::filled(24, 24, 0.0);
        let b = IntensityGrid::filled(24, 36, 0.0);
        assert!(matches!(
            similarity(&a, &b, &SimilarityParams::default()),
            Err(FrameError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn grid_smaller_than_tiles_is_an_error() {
        let a = IntensityGrid::filled(8, 8, 0.0);
        assert!(matches!(
            similarity(&a, &a, &SimilarityParams::default()),
            Err(FrameError::TooSmall { tiles: 12, .. })
        ));
    }

    #[test]
    fn detector_without_previous_frame() {
        let det = MotionDetector::default();
        let g = IntensityGrid::filled(24, 24, 0.1);
        assert_eq!(det.observe(None, &g, now()), Observation::FirstFrame);
    }

    #[test]
    fn detector_reports_motion_below_floor() {
        let det = MotionDetector::default();
        let base = IntensityGrid::filled(48, 48, 0.0);
        // 60 of 144 tiles disturbed → 58.
        let next = IntensityGrid::from_fn(48, 48, |r, c| {
            let tile = (r / 4) * 12 + c / 4;
            if tile < 60 && (r + c) % 2 == 0 { 1.0 } else { 0.0 }
        });
        match det.observe(Some(&base), &next, now()) {
            Observation::Motion(ev) => {
                assert_eq!(ev.score, 58);
                assert_eq!(ev.timestamp, now());
            }
            other => panic!("expected motion, got {other:?}"),
        }
    }

    #[test]
    fn detector_stays_still_above_floor() {
        let det = MotionDetector::default();
        let base = IntensityGrid::filled(48, 48, 0.0);
        assert_eq!(
            det.observe(Some(&base), &disturbed(1), now()),
            Observation::Still { score: 99 }
        );
    }

    #[test]
    fn detector_skips_mismatched_frames() {
        let det = MotionDetector::default();
        let a = IntensityGrid::filled(24, 24, 0.0);
        let b = IntensityGrid::filled(36, 36, 0.0);
        assert!(matches!(
            det.observe(Some(&a), &b, now()),
            Observation::Skipped(FrameError::ShapeMismatch { .. })
        ));
    }
}
