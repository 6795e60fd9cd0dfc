//! Camera sources.
//!
//! - `stub://...`: synthetic scene (always available)
//! - device paths such as `/dev/video0`: V4L2 capture (feature: ingest-v4l2)
//!
//! Every source hands out owned `RawFrame`s stamped at capture time. Device buffers are
//! copied and returned to the driver before `next_frame` returns.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::config::CaptureSettings;
use crate::frame::{FrameSource, RawFrame};
pub use synthetic::SyntheticConfig;
use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Config;
#[cfg(feature = "ingest-v4l2")]
use v4l2::V4l2Source;

/// The session camera, chosen from the configured source string.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Source),
}

impl CameraSource {
    pub fn new(settings: &CaptureSettings) -> Result<Self> {
        if settings.source.starts_with("stub://") {
            return Ok(Self::synthetic(SyntheticConfig {
                url: settings.source.clone(),
                framerate: settings.framerate,
                width: settings.width,
                height: settings.height,
                ..SyntheticConfig::default()
            }));
        }

        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(V4l2Source::new(V4l2Config {
                    device: settings.source.clone(),
                    framerate: settings.framerate,
                    width: settings.width,
                    height: settings.height,
                })),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            anyhow::bail!(
                "camera {} requires the ingest-v4l2 feature (use stub:// for a synthetic camera)",
                settings.source
            )
        }
    }

    pub fn synthetic(config: SyntheticConfig) -> Self {
        Self {
            backend: CameraBackend::Synthetic(SyntheticSource::new(config)),
        }
    }
}

impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.url().to_string(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.device().to_string(),
        }
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame().map(Some),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame().map(Some),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.release(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    fn frames_captured(&self) -> u64 {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.frames_captured(),
        }
    }
}
