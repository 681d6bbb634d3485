//! Driver Monitoring System (DMS)
//!
//! Per-frame driver state from a cabin camera:
//! - Face localization and dense landmark tracking
//! - Head pose (yaw, pitch, roll) from a perspective-n-point solve
//! - Eye openness from the eye aspect ratio
//! - Emotion and drowsiness classification of the face crop
//! - Lock-guarded single-slot publication of the latest status

pub mod classifier;
pub mod config;
pub mod detector;
pub mod eyes;
pub mod geometry;
pub mod landmarks;
pub mod monitor;
pub mod onnx;
pub mod overlay;
pub mod pipeline;
pub mod pose;
pub mod status;

#[cfg(test)]
mod test_support;

pub use classifier::{ClassificationResult, Classifier, ClassifierProfile, OnnxClassifier};
pub use config::{ClassifierInput, DmsConfig};
pub use detector::{FaceLocalizer, FaceRegion, SeetaFaceLocalizer};
pub use eyes::{Eye, EyePair, EyeStateEstimator, EyeStatus};
pub use landmarks::{FaceMeshTracker, Landmark, LandmarkSet, LandmarkTracker};
pub use monitor::{FrameSink, Monitor, NullSink};
pub use pipeline::FrameOrchestrator;
pub use pose::{HeadPose, HeadPoseSolver};
pub use status::{FlatStatus, StatusRecord, StatusStore};

use camera_capture::CameraError;
use thiserror::Error;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Landmark set has {0} points")]
    InvalidLandmarks(usize),

    #[error("Capture error: {0}")]
    Capture(#[from] CameraError),

    #[error("Frame sink closed")]
    SinkClosed,

    #[error("Thread error: {0}")]
    Thread(String),
}
