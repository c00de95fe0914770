use crate::accelerator::Accelerator;
use capture::Frame;
use schema::Detection;
use thiserror::Error;

pub mod noop;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("failed to load model on {accelerator}: {reason}")]
    Unavailable {
        accelerator: Accelerator,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference failed: {0}")]
    Failed(String),
}

/// A loaded detection model. Lives on the worker thread that loaded it and
/// is dropped when that worker drains.
pub trait Detector {
    /// Detect objects in `frame`. An empty list means nothing was found.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError>;
}

/// Acquires one [`Detector`] per worker, bound to that worker's accelerator.
///
/// Shared by all worker threads, so it must be `Send + Sync`; the detectors
/// it produces need not be.
pub trait DetectorLoader: Send + Sync + 'static {
    type Detector: Detector;

    fn load(&self, accelerator: Accelerator) -> Result<Self::Detector, ModelLoadError>;
}

impl<F, D> DetectorLoader for F
where
    F: Fn(Accelerator) -> Result<D, ModelLoadError> + Send + Sync + 'static,
    D: Detector,
{
    type Detector = D;

    fn load(&self, accelerator: Accelerator) -> Result<D, ModelLoadError> {
        self(accelerator)
    }
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        (**self).infer(frame)
    }
}
