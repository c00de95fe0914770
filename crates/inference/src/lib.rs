pub mod accelerator;
pub mod backend;
pub mod postprocessing;

pub use accelerator::{Accelerator, parse_accelerators};
pub use backend::{Detector, DetectorLoader, InferenceError, ModelLoadError};
pub use postprocessing::PostFilter;
