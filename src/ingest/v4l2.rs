//! V4L2 camera source.
//!
//! Captures from a local device node (e.g. /dev/video0) through memory-mapped buffers.
//! Each buffer is normalized to RGB and copied out before the next capture, so the
//! driver's buffer is handed back as soon as `next_frame` returns.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::frame::{CaptureTimeout, RawFrame};

/// Formats asked for, in order of preference.
const PREFERRED_FOURCC: [&[u8; 4]; 3] = [b"YUYV", b"RGB3", b"MJPG"];
const MMAP_BUFFERS: u32 = 4;
/// Longest a single dequeue may block before the capture loop gets control back.
const CAPTURE_POLL_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    pub framerate: u32,
    pub width: u32,
    pub height: u32,
}

pub(crate) struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    format: PixelFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub(crate) fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Yuyv,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub(crate) fn device(&self) -> &str {
        &self.config.device
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;

        let mut negotiated = None;
        for fourcc in PREFERRED_FOURCC {
            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(actual) => {
                    if let Some(pixel_format) = PixelFormat::from_fourcc(&actual.fourcc.repr) {
                        negotiated = Some((actual, pixel_format));
                        break;
                    }
                }
                Err(err) => log::debug!(
                    "V4l2Source: {} rejected {}: {}",
                    self.config.device,
                    String::from_utf8_lossy(fourcc),
                    err
                ),
            }
        }
        let (format, pixel_format) = negotiated.ok_or_else(|| {
            anyhow!(
                "v4l2 device {} supports none of YUYV, RGB3, MJPG",
                self.config.device
            )
        })?;

        if format.width != self.config.width || format.height != self.config.height {
            log::warn!(
                "V4l2Source: {} delivers {}x{} instead of {}x{}",
                self.config.device,
                format.width,
                format.height,
                self.config.width,
                self.config.height
            );
        }

        let params = v4l::video::capture::Parameters::with_fps(self.config.framerate);
        if let Err(err) = device.set_params(&params) {
            log::warn!(
                "V4l2Source: failed to set fps on {}: {}",
                self.config.device,
                err
            );
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.format = pixel_format;
        self.last_error = None;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })?;
                stream.set_timeout(CAPTURE_POLL_TIMEOUT);
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<RawFrame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state.with_mut(|fields| {
            let (buf, meta) = match fields.stream.next() {
                Ok(next) => next,
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(CaptureTimeout {
                        waited: CAPTURE_POLL_TIMEOUT,
                    }
                    .into());
                }
                Err(err) => return Err(anyhow::Error::new(err).context("capture v4l2 frame")),
            };
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, format)
        });
        let image = captured.map_err(|err| {
            if !err.is::<CaptureTimeout>() {
                self.last_error = Some(err.to_string());
            }
            err
        })?;

        self.last_error = None;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(RawFrame::new(image, Local::now(), self.frame_count))
    }

    pub(crate) fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.device);
        }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn health_grace(&self) -> Duration {
        let base_ms = (1000 / self.config.framerate.max(1)).saturating_mul(6);
        Duration::from_millis(u64::from(base_ms.max(2_000)))
    }
}
