//! `warden-perception` – Camera Change Detection
//!
//! Turns raw camera captures into comparable intensity grids and scores how
//! similar two consecutive captures are.
//!
//! # Modules
//!
//! - [`frame`] – [`normalize`][frame::normalize]: RGB24 frame → blurred
//!   single-channel [`IntensityGrid`][warden_types::IntensityGrid] in `[0, 1]`.
//! - [`similarity`] – [`similarity`][similarity::similarity]: tiled
//!   standard-deviation score (0–100) and the
//!   [`MotionDetector`][similarity::MotionDetector] that turns low scores
//!   into [`MotionEvent`][warden_types::MotionEvent]s.

pub mod frame;
pub mod similarity;

pub use frame::{FrameError, box_blur, normalize, to_intensity};
pub use similarity::{MotionDetector, Observation, SimilarityParams, similarity};
