//! Motion Watch
//!
//! Watches a single camera and saves a snapshot whenever something in the scene moves.
//!
//! # Architecture
//!
//! Every frame goes through the same short pipeline:
//!
//! 1. **Preprocess**: grayscale, then Gaussian blur (`detect::Preprocessor`).
//! 2. **Compare**: absolute difference against the reference frame, threshold, dilate,
//!    then keep the external contours whose area reaches the threshold
//!    (`detect::ChangeDetector`).
//! 3. **Decide**: the state machine in `motion` owns the reference. It is seeded by the
//!    first frame and replaced only when motion is detected.
//! 4. **Persist**: on motion the original colour frame is optionally annotated and
//!    written as a JPEG (`annotate`, `storage`).
//!
//! # Module Structure
//!
//! - `config`: layered, validated session configuration
//! - `frame`: `RawFrame` and the `FrameSource` trait
//! - `ingest`: camera sources (`stub://` synthetic, V4L2 devices)
//! - `pipeline`: the capture loop and its camera guard
//! - `shutdown`: cooperative two-stage shutdown

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod shutdown;
pub mod storage;

pub use annotate::{annotate, AnnotationOptions};
pub use config::{ConfigError, ConfigOverrides, KernelSize, MotionConfig};
pub use detect::{ChangeDetector, DetectionResult, Preprocessor, Region};
pub use frame::{CaptureTimeout, FrameSource, GrayFrame, RawFrame};
pub use ingest::{CameraSource, SyntheticConfig};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::V4l2Config;
pub use motion::{MotionDetector, MotionState, StepOutcome};
pub use pipeline::{
    CaptureLoop, FrameProcessor, RunStats, RunSummary, Termination, DEFAULT_MAX_READ_FAILURES,
};
pub use shutdown::{ShutdownRequest, ShutdownSignal};
pub use storage::{DirectorySink, InMemorySnapshotSink, SnapshotSink};
