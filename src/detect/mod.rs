mod change;
mod preprocess;
mod result;

pub use change::{ChangeDetector, DEFAULT_CHANGE_THRESHOLD, DEFAULT_DILATE_ITERATIONS};
pub use preprocess::Preprocessor;
pub use result::{DetectionResult, Region};
