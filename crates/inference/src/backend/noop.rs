//! Detector that never finds anything.
//!
//! Stands in for a real model when running the supervisor without one; every
//! frame yields an empty (but reported) detection list.

use super::{Detector, DetectorLoader, InferenceError, ModelLoadError};
use crate::accelerator::Accelerator;
use capture::Frame;
use schema::Detection;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLoader;

impl DetectorLoader for NoopLoader {
    type Detector = NoopDetector;

    fn load(&self, accelerator: Accelerator) -> Result<NoopDetector, ModelLoadError> {
        tracing::info!(%accelerator, "Loaded no-op detector");
        Ok(NoopDetector { accelerator })
    }
}

#[derive(Debug)]
pub struct NoopDetector {
    accelerator: Accelerator,
}

impl NoopDetector {
    pub fn accelerator(&self) -> Accelerator {
        self.accelerator
    }
}

impl Detector for NoopDetector {
    fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        Ok(Vec::new())
    }
}
