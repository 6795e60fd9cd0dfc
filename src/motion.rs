//! Motion state machine.
//!
//! Owns the reference frame. Every incoming frame is compared against the reference,
//! never against the immediately preceding frame: a static scene keeps comparing
//! against the same aging reference, and the reference only moves when motion is seen.

use image::RgbImage;

use crate::config::DetectionSettings;
use crate::detect::{ChangeDetector, Preprocessor, Region};
use crate::frame::GrayFrame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionState {
    /// No reference frame yet.
    Uninitialized,
    /// Reference held, last frame showed no motion.
    Idle,
    /// Last frame showed motion and became the reference.
    Motion,
    /// Terminal. No further frames are processed.
    ShuttingDown,
}

/// What a single step decided.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// Frame became the reference; no detection ran.
    Seeded,
    /// No qualifying change against the reference.
    Idle,
    /// Qualifying change; the frame is now the reference.
    Motion { regions: Vec<Region> },
    /// The machine is shutting down and ignored the frame.
    Halted,
}

impl StepOutcome {
    pub fn is_motion(&self) -> bool {
        matches!(self, StepOutcome::Motion { .. })
    }
}

pub struct MotionDetector {
    preprocessor: Preprocessor,
    detector: ChangeDetector,
    reference: Option<GrayFrame>,
    state: MotionState,
}

impl MotionDetector {
    pub fn new(preprocessor: Preprocessor, detector: ChangeDetector) -> Self {
        Self {
            preprocessor,
            detector,
            reference: None,
            state: MotionState::Uninitialized,
        }
    }

    pub fn from_settings(settings: &DetectionSettings) -> Self {
        let detector = ChangeDetector::new(settings.area_threshold)
            .with_change_threshold(settings.change_threshold)
            .with_dilate_iterations(settings.dilate_iterations);
        Self::new(Preprocessor::new(settings.kernel_size), detector)
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Current reference frame, `None` until the first frame is seen.
    pub fn reference(&self) -> Option<&GrayFrame> {
        self.reference.as_ref()
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Process one RGB frame.
    pub fn step(&mut self, frame: &RgbImage) -> StepOutcome {
        if self.state == MotionState::ShuttingDown {
            return StepOutcome::Halted;
        }

        let gray = self.preprocessor.preprocess(frame);

        let Some(reference) = self.reference.as_ref() else {
            log::debug!("seeding reference frame ({}x{})", gray.width(), gray.height());
            self.reference = Some(gray);
            self.state = MotionState::Idle;
            return StepOutcome::Seeded;
        };

        match self.detector.detect(reference, &gray) {
            Ok(result) if result.motion_detected => {
                self.reference = Some(gray);
                self.state = MotionState::Motion;
                StepOutcome::Motion {
                    regions: result.regions,
                }
            }
            Ok(_) => {
                self.state = MotionState::Idle;
                StepOutcome::Idle
            }
            Err(e) => {
                log::warn!("detection failed, reseeding reference: {}", e);
                self.reference = Some(gray);
                self.state = MotionState::Idle;
                StepOutcome::Seeded
            }
        }
    }

    /// Enter the terminal state. Reachable from any state.
    pub fn shut_down(&mut self) {
        self.state = MotionState::ShuttingDown;
    }
}
