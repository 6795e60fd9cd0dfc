//! motion_watchd - camera motion detection daemon
//!
//! Captures from one camera, compares every frame against a reference frame and saves
//! an optionally annotated JPEG snapshot whenever motion is detected. Runs until the
//! camera stops delivering frames or a termination signal arrives; a second signal
//! forces an immediate stop.

use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser};
use std::path::PathBuf;

use motion_watch::{
    CameraSource, CaptureLoop, ConfigOverrides, DirectorySink, MotionConfig, ShutdownSignal,
    Termination,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Save a snapshot whenever the camera sees motion")]
struct Args {
    /// Camera to capture from: a V4L2 device path or a stub:// synthetic camera.
    /// [default: /dev/video0]
    #[arg(long)]
    source: Option<String>,

    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capture framerate. [default: 30]
    #[arg(short = 'f', long)]
    framerate: Option<u32>,

    /// Capture width in pixels. [default: 752]
    #[arg(short = 'W', long)]
    width: Option<u32>,

    /// Capture height in pixels. [default: 480]
    #[arg(short = 'H', long)]
    height: Option<u32>,

    /// Gaussian blur kernel size; must be odd. [default: 21]
    #[arg(short = 'g', long)]
    gaussian_kernel_size: Option<u32>,

    /// Minimum contour area, in pixels, that counts as motion. [default: 2000]
    #[arg(short = 'a', long)]
    area_threshold: Option<u32>,

    /// Directory snapshots are written to; must already exist. [default: .]
    #[arg(short = 'd', long)]
    picture_directory: Option<PathBuf>,

    /// Stamp the capture time onto saved pictures.
    #[arg(short = 'D', long)]
    add_date_to_picture: bool,

    /// Outline detected regions on saved pictures.
    #[arg(short = 'C', long)]
    highlight_detected_changes: bool,

    /// Save a picture for every frame with motion.
    #[arg(short = 's', long)]
    save_pictures: bool,

    /// Milliseconds to wait after opening the camera. [default: 1000]
    #[arg(long)]
    warm_up_ms: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            source: self.source.clone(),
            framerate: self.framerate,
            width: self.width,
            height: self.height,
            warm_up_ms: self.warm_up_ms,
            gaussian_kernel_size: self.gaussian_kernel_size,
            area_threshold: self.area_threshold,
            picture_directory: self.picture_directory.clone(),
            add_date_to_picture: self.add_date_to_picture.then_some(true),
            highlight_detected_changes: self.highlight_detected_changes.then_some(true),
            save_pictures: self.save_pictures.then_some(true),
        }
    }

    fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

fn main() {
    let args = Args::parse();
    if args.verbose > 3 {
        Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                "-v may be given at most three times",
            )
            .exit();
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level()))
        .init();

    match run(&args) {
        Ok(Termination::Forced) => {
            log::error!("forced shutdown, pending work abandoned");
            std::process::exit(1);
        }
        Ok(_) => {}
        Err(e) => {
            log::error!("motion_watchd failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<Termination> {
    let cfg = MotionConfig::load(&args.overrides())?;
    log::info!(
        "camera={} {}x{} @ {} fps, kernel={}, area_threshold={}",
        cfg.capture.source,
        cfg.capture.width,
        cfg.capture.height,
        cfg.capture.framerate,
        cfg.detection.kernel_size.get(),
        cfg.detection.area_threshold
    );

    let sink = if cfg.output.save_pictures {
        let sink = DirectorySink::new(cfg.output.picture_directory.clone())?;
        log::info!("saving pictures to {}", sink.root().display());
        Some(sink)
    } else {
        log::info!("picture saving disabled");
        None
    };

    let shutdown = ShutdownSignal::new();
    shutdown.install_handler()?;

    let camera = CameraSource::new(&cfg.capture)?;
    let summary = CaptureLoop::from_config(&cfg, camera, sink, shutdown).run()?;
    Ok(summary.termination)
}
