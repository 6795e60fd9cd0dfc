//! Synthetic camera for `stub://` sources.
//!
//! Produces a static textured scene with seeded sensor noise. Once per `event_period`
//! frames a bright block sweeps across the scene for `event_length` frames, so a daemon
//! pointed at a stub camera has something to detect.

use anyhow::{anyhow, Result};
use chrono::Local;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use crate::frame::RawFrame;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub framerate: u32,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    /// Maximum per-channel noise added to every pixel.
    pub noise: u8,
    /// Frames between the start of two intrusions. The first period is always quiet.
    pub event_period: u64,
    /// Frames an intrusion stays in view.
    pub event_length: u64,
    /// Sleep between frames to honour `framerate`.
    pub pace: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            framerate: 30,
            width: 752,
            height: 480,
            seed: 0x5eed,
            noise: 3,
            event_period: 150,
            event_length: 30,
            pace: true,
        }
    }
}

pub(crate) struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    background: RgbImage,
    connected: bool,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub(crate) fn new(config: SyntheticConfig) -> Self {
        let background = RgbImage::from_fn(config.width, config.height, |x, y| {
            let shade = 60 + ((x / 16 + y / 16) % 4) as u8 * 12;
            Rgb([shade, shade.saturating_add(6), shade.saturating_sub(6)])
        });
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            background,
            connected: false,
            frame_count: 0,
            next_due: None,
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.config.url
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{} @ {} fps)",
            self.config.url,
            self.config.width,
            self.config.height,
            self.config.framerate
        );
        self.connected = true;
        self.next_due = None;
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<RawFrame> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} not connected", self.config.url));
        }
        if self.config.pace {
            self.wait_for_slot();
        }

        self.frame_count += 1;
        let image = self.render();
        Ok(RawFrame::new(image, Local::now(), self.frame_count))
    }

    pub(crate) fn release(&mut self) {
        if self.connected {
            log::info!("SyntheticSource: released {}", self.config.url);
        }
        self.connected = false;
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.connected
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn wait_for_slot(&mut self) {
        let interval = Duration::from_secs(1) / self.config.framerate.max(1);
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(self.next_due.map_or(now, |due| due.max(now)) + interval);
    }

    fn intruder_phase(&self) -> Option<u64> {
        if self.config.event_period == 0 || self.frame_count <= self.config.event_period {
            return None;
        }
        let phase = self.frame_count % self.config.event_period;
        (phase < self.config.event_length).then_some(phase)
    }

    fn render(&mut self) -> RgbImage {
        let mut image = self.background.clone();

        if let Some(phase) = self.intruder_phase() {
            let block_w = (self.config.width / 6).max(1);
            let block_h = (self.config.height / 4).max(1);
            let travel = self.config.width.saturating_sub(block_w) as u64;
            let step = travel / self.config.event_length.max(1);
            let left = (phase * step).min(travel) as u32;
            let top = self.config.height / 2 - block_h / 2;
            for y in top..top + block_h {
                for x in left..left + block_w {
                    image.put_pixel(x, y, Rgb([235, 220, 205]));
                }
            }
        }

        let noise = i16::from(self.config.noise);
        if noise > 0 {
            for pixel in image.pixels_mut() {
                for channel in pixel.0.iter_mut() {
                    let jitter: i16 = self.rng.gen_range(-noise..=noise);
                    *channel = (i16::from(*channel) + jitter).clamp(0, 255) as u8;
                }
            }
        }
        image
    }
}
