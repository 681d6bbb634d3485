//! Capability doubles shared by the unit tests

use std::sync::{Arc, Mutex};

use camera_capture::frame::VideoFrame;
use image::{Rgb, RgbImage};
use ndarray::Array4;

use crate::classifier::{Classifier, ClassifierProfile};
use crate::config::ClassifierInput;
use crate::detector::{FaceLocalizer, FaceRegion};
use crate::landmarks::{LandmarkSet, LandmarkTracker};
use crate::pipeline::FrameOrchestrator;
use crate::status::StatusStore;
use crate::{DmsConfig, DmsError};

pub const SIZE: u32 = 256;

pub struct FixedFaces(pub Vec<FaceRegion>);

impl FaceLocalizer for FixedFaces {
    fn locate(&self, _frame: &VideoFrame) -> Vec<FaceRegion> {
        self.0.clone()
    }
}

/// Hands out queued results, then reports no face
pub struct ScriptedTracker(pub Vec<Option<LandmarkSet>>);

impl LandmarkTracker for ScriptedTracker {
    fn track(&mut self, _frame: &VideoFrame) -> Option<LandmarkSet> {
        if self.0.is_empty() {
            None
        } else {
            self.0.remove(0)
        }
    }
}

pub struct StubClassifier {
    profile: ClassifierProfile,
    output: Result<Vec<f32>, ()>,
    calls: Mutex<u32>,
}

impl StubClassifier {
    pub fn new(profile: ClassifierProfile, output: Result<Vec<f32>, ()>) -> Arc<Self> {
        Arc::new(Self {
            profile,
            output,
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl Classifier for StubClassifier {
    fn profile(&self) -> &ClassifierProfile {
        &self.profile
    }

    fn predict(&self, _input: &Array4<f32>) -> Result<Vec<f32>, DmsError> {
        *self.calls.lock().unwrap() += 1;
        self.output
            .clone()
            .map_err(|_| DmsError::Inference("stub failure".into()))
    }
}

/// Emotion double answering "Neutral" at 0.8
pub fn emotion_stub() -> Arc<StubClassifier> {
    StubClassifier::new(
        ClassifierProfile::emotion(ClassifierInput::new(48, 48, 1)),
        Ok(vec![0.0, 0.0, 0.0, 0.0, 0.1, 0.1, 0.8]),
    )
}

/// Drowsiness double answering "Drowsy" at 0.7
pub fn drowsy_stub() -> Arc<StubClassifier> {
    StubClassifier::new(
        ClassifierProfile::drowsiness(ClassifierInput::new(32, 32, 3)),
        Ok(vec![0.3, 0.7]),
    )
}

pub fn face() -> FaceRegion {
    FaceRegion::clipped(64, 64, 128, 128, 1.0, SIZE, SIZE)
}

pub fn frame() -> VideoFrame {
    VideoFrame::from_rgb_image(RgbImage::from_pixel(SIZE, SIZE, Rgb([90, 90, 90])), 0, 0)
}

pub fn orchestrator(
    faces: Vec<FaceRegion>,
    tracked: Vec<Option<LandmarkSet>>,
    emotion: Arc<StubClassifier>,
    drowsiness: Arc<StubClassifier>,
) -> FrameOrchestrator {
    FrameOrchestrator::new(
        &DmsConfig::default(),
        Box::new(FixedFaces(faces)),
        Box::new(ScriptedTracker(tracked)),
        emotion,
        drowsiness,
        StatusStore::new(),
    )
    .unwrap()
}
