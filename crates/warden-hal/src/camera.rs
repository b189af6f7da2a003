//! Generic `Camera` trait and supporting types for image-capture hardware.

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use image::{ImageFormat, RgbImage};
use tracing::debug;
use uuid::Uuid;
use warden_types::WardenError;

use crate::command::CommandRunner;

/// A raw image frame returned by a camera driver.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGB24 pixel data, row-major.
    pub data: Vec<u8>,
}

impl CameraFrame {
    /// Decode an encoded image (PNG, JPEG, …) into an RGB24 frame.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::HardwareFault`] when the bytes are not a
    /// decodable image.
    pub fn decode(bytes: &[u8]) -> Result<Self, WardenError> {
        let rgb = image::load_from_memory(bytes)
            .map_err(|e| WardenError::hardware("camera", format!("decode failed: {e}")))?
            .to_rgb8();
        Ok(Self {
            width: rgb.width(),
            height: rgb.height(),
            data: rgb.into_raw(),
        })
    }

    /// Encode the frame as PNG.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::HardwareFault`] when the buffer does not match
    /// the frame dimensions or encoding fails.
    pub fn to_png(&self) -> Result<Vec<u8>, WardenError> {
        let img = RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            WardenError::hardware("camera", "frame buffer does not match its dimensions")
        })?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| WardenError::hardware("camera", format!("png encode failed: {e}")))?;
        Ok(out.into_inner())
    }
}

/// A camera or image-capture device.
///
/// Captures block the calling thread; async callers must use a blocking pool.
pub trait Camera: Send + Sync {
    /// Stable identifier for this camera, e.g. `"video0"`.
    fn id(&self) -> &str;

    /// Capture and return one frame.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Unavailable`] when the device produced no image
    /// (disconnected, busy) and [`WardenError::HardwareFault`] when the
    /// produced image cannot be decoded.
    fn capture(&self) -> Result<CameraFrame, WardenError>;
}

// ────────────────────────────────────────────────────────────────────────────
// fswebcam driver
// ────────────────────────────────────────────────────────────────────────────

/// Default location of the `fswebcam` binary.
pub const FSWEBCAM: &str = "/usr/bin/fswebcam";

/// Camera driver that shells out to `fswebcam` and decodes the PNG it writes.
pub struct FswebcamCamera {
    runner: Arc<dyn CommandRunner>,
    device: String,
    resolution: String,
    scratch_dir: PathBuf,
}

impl FswebcamCamera {
    /// `device` is the `/dev` node name (e.g. `"video0"`), `resolution` is
    /// `WIDTHxHEIGHT`.
    pub fn new(runner: Arc<dyn CommandRunner>, device: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self {
            runner,
            device: device.into(),
            resolution: resolution.into(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Write intermediate PNG files under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }
}

impl Camera for FswebcamCamera {
    fn id(&self) -> &str {
        &self.device
    }

    fn capture(&self) -> Result<CameraFrame, WardenError> {
        let path = self.scratch_dir.join(format!("{}.png", Uuid::new_v4().simple()));
        let path_arg = path.to_string_lossy().into_owned();
        let device = format!("/dev/{}", self.device);
        let output = self.runner.run(
            FSWEBCAM,
            &[
                "-r",
                &self.resolution,
                "--no-banner",
                "--device",
                &device,
                "--png",
                "9",
                &path_arg,
            ],
        )?;

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!(device = %self.device, stdout = %output.stdout, stderr = %output.stderr, "fswebcam wrote no image");
                return Err(WardenError::Unavailable(format!("camera {} produced no image", self.device)));
            }
        };
        let _ = fs::remove_file(&path);
        CameraFrame::decode(&bytes)
    }
}
