//! Captured frames and the source seam.
//!
//! - `RawFrame`: one RGB capture plus its wall-clock timestamp. The pipeline owns it for
//!   exactly one iteration and drops it before asking the source for the next one.
//! - `FrameSource`: pull-based capture. Sources are opened once, polled synchronously,
//!   and released once.

use anyhow::Result;
use chrono::{DateTime, Local};
use image::{GrayImage, RgbImage};
use std::time::Duration;

/// Grayscale, smoothed form of a frame. This is what the detector compares.
pub type GrayFrame = GrayImage;

/// A single capture from a frame source.
#[derive(Clone, Debug)]
pub struct RawFrame {
    /// RGB pixels, row-major.
    pub image: RgbImage,
    /// Wall-clock capture time (used for overlays and snapshot names).
    pub captured_at: DateTime<Local>,
    /// Per-session capture counter, starting at 1.
    pub sequence: u64,
}

impl RawFrame {
    pub fn new(image: RgbImage, captured_at: DateTime<Local>, sequence: u64) -> Self {
        Self {
            image,
            captured_at,
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// No frame arrived within a source's poll window. The device is still usable; ask again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureTimeout {
    pub waited: Duration,
}

impl std::fmt::Display for CaptureTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no frame within {} ms", self.waited.as_millis())
    }
}
impl std::error::Error for CaptureTimeout {}

/// Pull-based frame source.
///
/// `next_frame` waits for a frame, but no longer than the source's poll window: a source
/// that can stall reports [`CaptureTimeout`] so the caller gets a chance to react to
/// shutdown. Any other error concerns the frame being captured. `Ok(None)` means the
/// source is exhausted and the capture loop should stop normally.
pub trait FrameSource {
    /// Human-readable identifier (device path or stub URL).
    fn describe(&self) -> String;

    /// Acquire the underlying device. Called exactly once before the first frame.
    fn open(&mut self) -> Result<()>;

    /// Capture the next frame.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Release the underlying device. Must be safe to call more than once.
    fn release(&mut self);

    /// Whether the source is currently delivering frames.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Frames delivered since `open`.
    fn frames_captured(&self) -> u64;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn frames_captured(&self) -> u64 {
        (**self).frames_captured()
    }
}
