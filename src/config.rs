use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{DEFAULT_CHANGE_THRESHOLD, DEFAULT_DILATE_ITERATIONS};

const DEFAULT_SOURCE: &str = "/dev/video0";
const DEFAULT_FRAMERATE: u32 = 30;
const DEFAULT_WIDTH: u32 = 752;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_WARM_UP_MS: u64 = 1000;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;
const DEFAULT_KERNEL_SIZE: u32 = 21;
const DEFAULT_AREA_THRESHOLD: u32 = 2000;
const DEFAULT_PICTURE_DIRECTORY: &str = ".";

/// Configuration failure. Always fatal, always raised before capture starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid configuration: {}", self.message)
    }
}
impl std::error::Error for ConfigError {}

/// Side of the square smoothing kernel. Always odd and positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelSize(u32);

impl KernelSize {
    pub fn new(size: u32) -> std::result::Result<Self, ConfigError> {
        if size == 0 || size % 2 == 0 {
            return Err(ConfigError::new(format!(
                "the gaussian kernel size must be a positive odd number ({})",
                size
            )));
        }
        Ok(Self(size))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for KernelSize {
    fn default() -> Self {
        Self(DEFAULT_KERNEL_SIZE)
    }
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    framerate: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    warm_up_ms: Option<u64>,
    stats_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    gaussian_kernel_size: Option<u32>,
    area_threshold: Option<u32>,
    change_threshold: Option<u8>,
    dilate_iterations: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    picture_directory: Option<PathBuf>,
    add_date_to_picture: Option<bool>,
    highlight_detected_changes: Option<bool>,
    save_pictures: Option<bool>,
}

/// Values supplied on the command line. `None` leaves the lower layers in effect.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub source: Option<String>,
    pub framerate: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub warm_up_ms: Option<u64>,
    pub gaussian_kernel_size: Option<u32>,
    pub area_threshold: Option<u32>,
    pub picture_directory: Option<PathBuf>,
    pub add_date_to_picture: Option<bool>,
    pub highlight_detected_changes: Option<bool>,
    pub save_pictures: Option<bool>,
}

/// Validated session configuration.
///
/// Built once by [`MotionConfig::load`] or [`MotionConfig::from_overrides`]; both run the
/// same validation, so a value of this type always describes a startable session.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct MotionConfig {
    pub capture: CaptureSettings,
    pub detection: DetectionSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub source: String,
    pub framerate: u32,
    pub width: u32,
    pub height: u32,
    pub warm_up: Duration,
    pub stats_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub kernel_size: KernelSize,
    pub area_threshold: u32,
    /// Per-pixel intensity change (0-255) above which a pixel counts as changed.
    pub change_threshold: u8,
    pub dilate_iterations: u8,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub picture_directory: PathBuf,
    pub add_date_to_picture: bool,
    pub highlight_detected_changes: bool,
    pub save_pictures: bool,
}

/// Unvalidated working copy used while the layers are merged.
#[derive(Debug, Clone)]
struct ConfigDraft {
    source: String,
    framerate: u32,
    width: u32,
    height: u32,
    warm_up_ms: u64,
    stats_interval_secs: u64,
    gaussian_kernel_size: u32,
    area_threshold: u32,
    change_threshold: u8,
    dilate_iterations: u8,
    picture_directory: PathBuf,
    add_date_to_picture: bool,
    highlight_detected_changes: bool,
    save_pictures: bool,
}

impl MotionConfig {
    /// Defaults, then the JSON config file (`--config` or `MOTION_CONFIG`), then
    /// `MOTION_*` environment variables, then command-line overrides.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let config_path = overrides
            .config_path
            .clone()
            .or_else(|| std::env::var("MOTION_CONFIG").ok().map(PathBuf::from));
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut draft = ConfigDraft::from_file(file_cfg.unwrap_or_default());
        draft.apply_env()?;
        draft.apply_overrides(overrides);
        draft.validate()
    }

    /// Defaults plus explicit overrides. Ignores the environment and config files.
    pub fn from_overrides(overrides: &ConfigOverrides) -> Result<Self> {
        let mut draft = ConfigDraft::from_file(MotionConfigFile::default());
        draft.apply_overrides(overrides);
        draft.validate()
    }
}

impl ConfigDraft {
    fn from_file(file: MotionConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        Self {
            source: capture
                .source
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            framerate: capture.framerate.unwrap_or(DEFAULT_FRAMERATE),
            width: capture.width.unwrap_or(DEFAULT_WIDTH),
            height: capture.height.unwrap_or(DEFAULT_HEIGHT),
            warm_up_ms: capture.warm_up_ms.unwrap_or(DEFAULT_WARM_UP_MS),
            stats_interval_secs: capture
                .stats_interval_secs
                .unwrap_or(DEFAULT_STATS_INTERVAL_SECS),
            gaussian_kernel_size: detection
                .gaussian_kernel_size
                .unwrap_or(DEFAULT_KERNEL_SIZE),
            area_threshold: detection.area_threshold.unwrap_or(DEFAULT_AREA_THRESHOLD),
            change_threshold: detection
                .change_threshold
                .unwrap_or(DEFAULT_CHANGE_THRESHOLD),
            dilate_iterations: detection
                .dilate_iterations
                .unwrap_or(DEFAULT_DILATE_ITERATIONS),
            picture_directory: output
                .picture_directory
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PICTURE_DIRECTORY)),
            add_date_to_picture: output.add_date_to_picture.unwrap_or(false),
            highlight_detected_changes: output.highlight_detected_changes.unwrap_or(false),
            save_pictures: output.save_pictures.unwrap_or(false),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("MOTION_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(dir) = std::env::var("MOTION_PICTURE_DIR") {
            if !dir.trim().is_empty() {
                self.picture_directory = PathBuf::from(dir);
            }
        }
        if let Ok(threshold) = std::env::var("MOTION_AREA_THRESHOLD") {
            self.area_threshold = threshold.trim().parse().map_err(|_| {
                ConfigError::new("MOTION_AREA_THRESHOLD must be a non-negative integer")
            })?;
        }
        if let Ok(size) = std::env::var("MOTION_KERNEL_SIZE") {
            self.gaussian_kernel_size = size.trim().parse().map_err(|_| {
                ConfigError::new("MOTION_KERNEL_SIZE must be a positive odd integer")
            })?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(source) = &overrides.source {
            self.source = source.clone();
        }
        if let Some(framerate) = overrides.framerate {
            self.framerate = framerate;
        }
        if let Some(width) = overrides.width {
            self.width = width;
        }
        if let Some(height) = overrides.height {
            self.height = height;
        }
        if let Some(warm_up_ms) = overrides.warm_up_ms {
            self.warm_up_ms = warm_up_ms;
        }
        if let Some(size) = overrides.gaussian_kernel_size {
            self.gaussian_kernel_size = size;
        }
        if let Some(threshold) = overrides.area_threshold {
            self.area_threshold = threshold;
        }
        if let Some(dir) = &overrides.picture_directory {
            self.picture_directory = dir.clone();
        }
        if let Some(flag) = overrides.add_date_to_picture {
            self.add_date_to_picture = flag;
        }
        if let Some(flag) = overrides.highlight_detected_changes {
            self.highlight_detected_changes = flag;
        }
        if let Some(flag) = overrides.save_pictures {
            self.save_pictures = flag;
        }
    }

    fn validate(self) -> Result<MotionConfig> {
        if !self.picture_directory.is_dir() {
            return Err(ConfigError::new(format!(
                "directory \"{}\" doesn't exist",
                self.picture_directory.display()
            ))
            .into());
        }
        let kernel_size = KernelSize::new(self.gaussian_kernel_size)?;
        if self.framerate == 0 {
            return Err(ConfigError::new("framerate must be greater than zero").into());
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::new(format!(
                "capture resolution must be non-zero ({}x{})",
                self.width, self.height
            ))
            .into());
        }
        if self.source.trim().is_empty() {
            return Err(ConfigError::new("capture source must not be empty").into());
        }

        Ok(MotionConfig {
            capture: CaptureSettings {
                source: self.source,
                framerate: self.framerate,
                width: self.width,
                height: self.height,
                warm_up: Duration::from_millis(self.warm_up_ms),
                stats_interval: Duration::from_secs(self.stats_interval_secs),
            },
            detection: DetectionSettings {
                kernel_size,
                area_threshold: self.area_threshold,
                change_threshold: self.change_threshold,
                dilate_iterations: self.dilate_iterations,
            },
            output: OutputSettings {
                picture_directory: self.picture_directory,
                add_date_to_picture: self.add_date_to_picture,
                highlight_detected_changes: self.highlight_detected_changes,
                save_pictures: self.save_pictures,
            },
        })
    }
}

fn read_config_file(path: &Path) -> Result<MotionConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::new(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    let cfg = serde_json::from_str(&raw).map_err(|e| {
        ConfigError::new(format!("invalid config file {}: {}", path.display(), e))
    })?;
    Ok(cfg)
}
