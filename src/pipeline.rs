//! Capture loop.
//!
//! One frame in flight at a time: pull, preprocess + detect, annotate and persist on
//! motion, drop the frame, check for shutdown, repeat. The camera is held by a guard
//! that releases it exactly once however the loop ends.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use crate::annotate::{annotate, AnnotationOptions};
use crate::config::MotionConfig;
use crate::frame::{CaptureTimeout, FrameSource, RawFrame};
use crate::motion::{MotionDetector, StepOutcome};
use crate::shutdown::ShutdownSignal;
use crate::storage::SnapshotSink;

/// Warm-up waits are sliced so a shutdown request is noticed promptly.
const WARM_UP_POLL: Duration = Duration::from_millis(50);

/// Unreadable frames tolerated in a row before the camera is considered gone.
pub const DEFAULT_MAX_READ_FAILURES: u32 = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames_processed: u64,
    pub motion_events: u64,
    pub snapshots_saved: u64,
    pub snapshot_failures: u64,
    /// Frames the source failed to deliver (decode errors, short buffers).
    pub read_failures: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The source reported no more frames.
    SourceExhausted,
    /// Graceful shutdown after the current frame.
    Shutdown,
    /// Escalated shutdown; the frame in flight may have been abandoned.
    Forced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub stats: RunStats,
    pub termination: Termination,
}

/// Per-frame work: state machine step, then annotation and persistence on motion.
pub struct FrameProcessor<K: SnapshotSink> {
    detector: MotionDetector,
    annotation: AnnotationOptions,
    sink: Option<K>,
    stats: RunStats,
}

impl<K: SnapshotSink> FrameProcessor<K> {
    /// `sink` is `None` when persistence is disabled.
    pub fn new(detector: MotionDetector, annotation: AnnotationOptions, sink: Option<K>) -> Self {
        Self {
            detector,
            annotation,
            sink,
            stats: RunStats::default(),
        }
    }

    pub fn from_config(config: &MotionConfig, sink: Option<K>) -> Self {
        Self::new(
            MotionDetector::from_settings(&config.detection),
            AnnotationOptions::from(&config.output),
            sink,
        )
    }

    pub fn detector(&self) -> &MotionDetector {
        &self.detector
    }

    pub fn sink(&self) -> Option<&K> {
        self.sink.as_ref()
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Process one frame. Persistence failures are logged and counted, never returned.
    pub fn process(&mut self, frame: RawFrame, shutdown: &ShutdownSignal) -> StepOutcome {
        let outcome = self.detector.step(&frame.image);
        if outcome != StepOutcome::Halted {
            self.stats.frames_processed += 1;
        }

        let StepOutcome::Motion { regions } = &outcome else {
            return outcome;
        };
        self.stats.motion_events += 1;
        log::info!(
            "motion detected in frame #{}: {} region(s)",
            frame.sequence,
            regions.len()
        );

        if shutdown.is_forced() {
            log::warn!("forced shutdown pending, skipping snapshot for frame #{}", frame.sequence);
            return outcome;
        }

        let RawFrame {
            mut image,
            captured_at,
            ..
        } = frame;
        annotate(&mut image, regions, &captured_at, self.annotation);

        if let Some(sink) = self.sink.as_mut() {
            match sink.persist(&image, &captured_at) {
                Ok(path) => {
                    self.stats.snapshots_saved += 1;
                    log::info!("snapshot saved to {}", path.display());
                }
                Err(e) => {
                    self.stats.snapshot_failures += 1;
                    log::warn!("unable to save snapshot: {:#}", e);
                }
            }
        }
        outcome
    }

    pub fn shut_down(&mut self) {
        self.detector.shut_down();
    }

    fn record_read_failure(&mut self) {
        self.stats.read_failures += 1;
    }
}

/// Holds an opened source and releases it on drop.
struct CameraGuard<S: FrameSource> {
    source: S,
    opened_at: Instant,
}

impl<S: FrameSource> CameraGuard<S> {
    fn acquire(mut source: S) -> Result<Self> {
        let name = source.describe();
        if let Err(e) = source.open() {
            source.release();
            return Err(e).with_context(|| format!("open camera {}", name));
        }
        log::info!("camera {} opened", name);
        Ok(Self {
            source,
            opened_at: Instant::now(),
        })
    }
}

impl<S: FrameSource> Drop for CameraGuard<S> {
    fn drop(&mut self) {
        self.source.release();
        log::debug!("camera {} released", self.source.describe());
    }
}

pub struct CaptureLoop<S: FrameSource, K: SnapshotSink> {
    source: S,
    processor: FrameProcessor<K>,
    shutdown: ShutdownSignal,
    warm_up: Duration,
    stats_interval: Duration,
    max_read_failures: u32,
}

impl<S: FrameSource, K: SnapshotSink> CaptureLoop<S, K> {
    pub fn new(source: S, processor: FrameProcessor<K>, shutdown: ShutdownSignal) -> Self {
        Self {
            source,
            processor,
            shutdown,
            warm_up: Duration::ZERO,
            stats_interval: Duration::from_secs(5),
            max_read_failures: DEFAULT_MAX_READ_FAILURES,
        }
    }

    pub fn from_config(
        config: &MotionConfig,
        source: S,
        sink: Option<K>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self::new(source, FrameProcessor::from_config(config, sink), shutdown)
            .with_warm_up(config.capture.warm_up)
            .with_stats_interval(config.capture.stats_interval)
    }

    /// Delay after opening the camera before the first frame is trusted.
    pub fn with_warm_up(mut self, warm_up: Duration) -> Self {
        self.warm_up = warm_up;
        self
    }

    /// Zero disables the periodic stats line.
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Consecutive failed reads after which the run is aborted. At least one.
    pub fn with_max_read_failures(mut self, max: u32) -> Self {
        self.max_read_failures = max.max(1);
        self
    }

    /// Run until the source is exhausted or shutdown is requested.
    ///
    /// A failed read only costs that frame. The run fails when the camera cannot be
    /// opened or `max_read_failures` reads fail in a row.
    pub fn run(self) -> Result<RunSummary> {
        let CaptureLoop {
            source,
            mut processor,
            shutdown,
            warm_up,
            stats_interval,
            max_read_failures,
        } = self;

        let mut camera = CameraGuard::acquire(source)?;

        log::debug!("waiting {} ms for camera warm-up", warm_up.as_millis());
        wait_for_warm_up(camera.opened_at, warm_up, &shutdown);
        log::info!("motion watch started on {}", camera.source.describe());

        let mut last_stats = Instant::now();
        let mut failed_in_a_row = 0u32;
        let termination = loop {
            if shutdown.is_forced() {
                break Termination::Forced;
            }
            if shutdown.is_requested() {
                break Termination::Shutdown;
            }

            let frame = match camera.source.next_frame() {
                Ok(Some(frame)) => {
                    failed_in_a_row = 0;
                    frame
                }
                Ok(None) => {
                    log::info!("camera {} has no more frames", camera.source.describe());
                    break Termination::SourceExhausted;
                }
                Err(e) if e.is::<CaptureTimeout>() => {
                    log::trace!("camera {}: {}", camera.source.describe(), e);
                    continue;
                }
                Err(e) => {
                    processor.record_read_failure();
                    failed_in_a_row += 1;
                    if failed_in_a_row >= max_read_failures {
                        return Err(e).with_context(|| {
                            format!(
                                "camera {} failed {} reads in a row",
                                camera.source.describe(),
                                failed_in_a_row
                            )
                        });
                    }
                    log::warn!(
                        "dropping unreadable frame from {}: {:#}",
                        camera.source.describe(),
                        e
                    );
                    continue;
                }
            };
            if shutdown.is_forced() {
                break Termination::Forced;
            }

            let outcome = processor.process(frame, &shutdown);
            log::debug!("frame outcome: {:?}", outcome);

            if !stats_interval.is_zero() && last_stats.elapsed() >= stats_interval {
                log_stats(&processor.stats(), &camera.source);
                last_stats = Instant::now();
            }
        };

        processor.shut_down();
        drop(camera);

        let stats = processor.stats();
        log::info!(
            "motion watch stopped ({:?}): frames={} motion={} saved={} failed={} unreadable={}",
            termination,
            stats.frames_processed,
            stats.motion_events,
            stats.snapshots_saved,
            stats.snapshot_failures,
            stats.read_failures
        );
        Ok(RunSummary { stats, termination })
    }
}

fn wait_for_warm_up(opened_at: Instant, warm_up: Duration, shutdown: &ShutdownSignal) {
    loop {
        let elapsed = opened_at.elapsed();
        if elapsed >= warm_up || shutdown.is_requested() {
            return;
        }
        std::thread::sleep((warm_up - elapsed).min(WARM_UP_POLL));
    }
}

fn log_stats<S: FrameSource>(stats: &RunStats, source: &S) {
    log::info!(
        "camera health={} captured={} processed={} motion={} saved={} failed={} unreadable={}",
        source.is_healthy(),
        source.frames_captured(),
        stats.frames_processed,
        stats.motion_events,
        stats.snapshots_saved,
        stats.snapshot_failures,
        stats.read_failures
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelSize;
    use crate::detect::{ChangeDetector, Preprocessor};
    use crate::storage::InMemorySnapshotSink;
    use chrono::{Local, TimeZone};
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        released: AtomicUsize,
    }

    struct ListSource {
        frames: VecDeque<RgbImage>,
        counters: Arc<Counters>,
        sequence: u64,
        fail_open: bool,
        on_frame: Option<(u64, ShutdownSignal)>,
        escalate: bool,
        calls: u64,
        failing_calls: Vec<u64>,
    }

    impl ListSource {
        fn new(frames: Vec<RgbImage>, counters: Arc<Counters>) -> Self {
            Self {
                frames: frames.into(),
                counters,
                sequence: 0,
                fail_open: false,
                on_frame: None,
                escalate: false,
                calls: 0,
                failing_calls: Vec::new(),
            }
        }
    }

    impl FrameSource for ListSource {
        fn describe(&self) -> String {
            "list://test".to_string()
        }

        fn open(&mut self) -> Result<()> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                anyhow::bail!("no such camera");
            }
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<RawFrame>> {
            self.calls += 1;
            if self.failing_calls.contains(&self.calls) {
                anyhow::bail!("corrupt mjpeg frame");
            }
            let Some(image) = self.frames.pop_front() else {
                return Ok(None);
            };
            self.sequence += 1;
            if let Some((at, signal)) = &self.on_frame {
                if *at == self.sequence {
                    signal.request();
                    if self.escalate {
                        signal.request();
                    }
                }
            }
            let ts = Local
                .with_ymd_and_hms(2026, 10, 19, 9, 0, 0)
                .single()
                .expect("timestamp")
                + chrono::Duration::milliseconds(self.sequence as i64 * 100);
            Ok(Some(RawFrame::new(image, ts, self.sequence)))
        }

        fn release(&mut self) {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }

        fn frames_captured(&self) -> u64 {
            self.sequence
        }
    }

    /// Never delivers a frame; every poll window times out.
    struct StalledSource {
        counters: Arc<Counters>,
        polls: u64,
        escalate_at_poll: u64,
        shutdown: ShutdownSignal,
    }

    impl FrameSource for StalledSource {
        fn describe(&self) -> String {
            "stalled://test".to_string()
        }

        fn open(&mut self) -> Result<()> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<RawFrame>> {
            let waited = Duration::from_millis(50);
            std::thread::sleep(waited);
            self.polls += 1;
            if self.polls == self.escalate_at_poll {
                self.shutdown.request();
                self.shutdown.request();
            }
            Err(CaptureTimeout { waited }.into())
        }

        fn release(&mut self) {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }

        fn is_healthy(&self) -> bool {
            false
        }

        fn frames_captured(&self) -> u64 {
            0
        }
    }

    fn scene() -> RgbImage {
        RgbImage::from_pixel(120, 90, Rgb([50, 50, 50]))
    }

    fn with_block(base: &RgbImage) -> RgbImage {
        let mut img = base.clone();
        for y in 20..70 {
            for x in 30..90 {
                img.put_pixel(x, y, Rgb([240, 240, 240]));
            }
        }
        img
    }

    fn processor() -> FrameProcessor<InMemorySnapshotSink> {
        FrameProcessor::new(
            MotionDetector::new(
                Preprocessor::new(KernelSize::new(5).unwrap()),
                ChangeDetector::new(2000),
            ),
            AnnotationOptions {
                timestamp: true,
                highlight: true,
            },
            Some(InMemorySnapshotSink::new()),
        )
    }

    #[test]
    fn runs_until_source_exhausted_and_releases_once() -> Result<()> {
        let counters = Arc::new(Counters::default());
        let source = ListSource::new(
            vec![scene(), with_block(&scene()), with_block(&scene())],
            counters.clone(),
        );

        let summary = CaptureLoop::new(source, processor(), ShutdownSignal::new()).run()?;

        assert_eq!(summary.termination, Termination::SourceExhausted);
        assert_eq!(summary.stats.frames_processed, 3);
        assert_eq!(summary.stats.motion_events, 1);
        assert_eq!(summary.stats.snapshots_saved, 1);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn graceful_shutdown_finishes_current_frame() -> Result<()> {
        let counters = Arc::new(Counters::default());
        let shutdown = ShutdownSignal::new();
        let mut source = ListSource::new(vec![scene(); 5], counters.clone());
        source.on_frame = Some((2, shutdown.clone()));

        let summary = CaptureLoop::new(source, processor(), shutdown).run()?;

        assert_eq!(summary.termination, Termination::Shutdown);
        assert_eq!(summary.stats.frames_processed, 2);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn pending_request_stops_before_first_frame() -> Result<()> {
        let counters = Arc::new(Counters::default());
        let shutdown = ShutdownSignal::new();
        shutdown.request();
        let source = ListSource::new(vec![scene(), with_block(&scene())], counters.clone());

        let summary = CaptureLoop::new(source, processor(), shutdown).run()?;
        assert_eq!(summary.termination, Termination::Shutdown);
        assert_eq!(summary.stats.frames_processed, 0);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn escalation_during_capture_drops_the_frame() -> Result<()> {
        let counters = Arc::new(Counters::default());
        let shutdown = ShutdownSignal::new();
        let mut source = ListSource::new(
            vec![scene(), with_block(&scene()), with_block(&scene())],
            counters.clone(),
        );
        source.on_frame = Some((2, shutdown.clone()));
        source.escalate = true;

        let summary = CaptureLoop::new(source, processor(), shutdown).run()?;
        assert_eq!(summary.termination, Termination::Forced);
        assert_eq!(summary.stats.frames_processed, 1);
        assert_eq!(summary.stats.snapshots_saved, 0);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn forced_request_skips_persistence() -> Result<()> {
        let shutdown = ShutdownSignal::new();
        let mut processor = processor();
        let ts = Local
            .with_ymd_and_hms(2026, 10, 19, 9, 0, 0)
            .single()
            .expect("timestamp");

        assert_eq!(
            processor.process(RawFrame::new(scene(), ts, 1), &shutdown),
            StepOutcome::Seeded
        );
        shutdown.request();
        shutdown.request();
        assert!(processor
            .process(RawFrame::new(with_block(&scene()), ts, 2), &shutdown)
            .is_motion());

        let stats = processor.stats();
        assert_eq!(stats.motion_events, 1);
        assert_eq!(stats.snapshots_saved, 0);
        assert!(processor.sink().expect("sink").is_empty());
        Ok(())
    }

    #[test]
    fn unreadable_frame_is_skipped() -> Result<()> {
        let counters = Arc::new(Counters::default());
        let mut source = ListSource::new(
            vec![scene(), with_block(&scene()), with_block(&scene())],
            counters.clone(),
        );
        source.failing_calls = vec![2];

        let summary = CaptureLoop::new(source, processor(), ShutdownSignal::new()).run()?;

        assert_eq!(summary.termination, Termination::SourceExhausted);
        assert_eq!(summary.stats.read_failures, 1);
        assert_eq!(summary.stats.frames_processed, 3);
        assert_eq!(summary.stats.motion_events, 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn isolated_failures_do_not_add_up() -> Result<()> {
        let counters = Arc::new(Counters::default());
        let mut source = ListSource::new(vec![scene(); 4], counters);
        source.failing_calls = vec![1, 3, 5, 7];

        let summary = CaptureLoop::new(source, processor(), ShutdownSignal::new())
            .with_max_read_failures(2)
            .run()?;
        assert_eq!(summary.termination, Termination::SourceExhausted);
        assert_eq!(summary.stats.read_failures, 4);
        assert_eq!(summary.stats.frames_processed, 4);
        Ok(())
    }

    #[test]
    fn repeated_read_failures_end_the_run() {
        let counters = Arc::new(Counters::default());
        let mut source = ListSource::new(vec![scene(); 20], counters.clone());
        source.failing_calls = (2..=20).collect();

        let err = CaptureLoop::new(source, processor(), ShutdownSignal::new())
            .with_max_read_failures(3)
            .run()
            .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("failed 3 reads in a row"), "{}", message);
        assert!(message.contains("corrupt mjpeg frame"), "{}", message);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stalled_camera_honours_forced_shutdown() -> Result<()> {
        let counters = Arc::new(Counters::default());
        let shutdown = ShutdownSignal::new();
        let source = StalledSource {
            counters: counters.clone(),
            polls: 0,
            escalate_at_poll: 4,
            shutdown: shutdown.clone(),
        };

        let started = Instant::now();
        let summary = CaptureLoop::new(source, processor(), shutdown).run()?;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(summary.termination, Termination::Forced);
        assert_eq!(summary.stats.frames_processed, 0);
        assert_eq!(summary.stats.read_failures, 0);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn open_failure_is_returned_and_source_released() {
        let counters = Arc::new(Counters::default());
        let mut source = ListSource::new(vec![scene()], counters.clone());
        source.fail_open = true;

        let err = CaptureLoop::new(source, processor(), ShutdownSignal::new())
            .run()
            .unwrap_err();
        assert!(format!("{:#}", err).contains("no such camera"));
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn warm_up_delays_first_frame() -> Result<()> {
        let counters = Arc::new(Counters::default());
        let source = ListSource::new(vec![scene()], counters);

        let started = Instant::now();
        CaptureLoop::new(source, processor(), ShutdownSignal::new())
            .with_warm_up(Duration::from_millis(120))
            .run()?;
        assert!(started.elapsed() >= Duration::from_millis(120));
        Ok(())
    }

    #[test]
    fn warm_up_is_cut_short_by_shutdown() -> Result<()> {
        let counters = Arc::new(Counters::default());
        let source = ListSource::new(vec![scene()], counters);
        let shutdown = ShutdownSignal::new();
        shutdown.request();

        let started = Instant::now();
        let summary = CaptureLoop::new(source, processor(), shutdown)
            .with_warm_up(Duration::from_secs(30))
            .run()?;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(summary.termination, Termination::Shutdown);
        Ok(())
    }

    #[test]
    fn snapshot_is_annotated_copy_of_original_frame() {
        let shutdown = ShutdownSignal::new();
        let mut processor = processor();
        let ts = Local
            .with_ymd_and_hms(2026, 10, 19, 9, 0, 0)
            .single()
            .expect("timestamp");

        processor.process(RawFrame::new(scene(), ts, 1), &shutdown);
        let trigger = with_block(&scene());
        processor.process(RawFrame::new(trigger.clone(), ts, 2), &shutdown);

        let sink = processor.sink().expect("sink");
        assert_eq!(sink.len(), 1);
        let saved = sink.images().next().expect("snapshot");
        assert_eq!(saved.dimensions(), trigger.dimensions());
        // centre of the block is untouched colour, the outline is green
        assert_eq!(*saved.get_pixel(60, 45), Rgb([240, 240, 240]));
        assert!(saved.pixels().any(|p| *p == crate::annotate::HIGHLIGHT_COLOR));
    }
}
