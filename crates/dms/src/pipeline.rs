//! Per-frame orchestration: localize, track, solve, classify, publish

use std::sync::Arc;

use camera_capture::frame::VideoFrame;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::classifier::{classify, ClassificationResult, Classifier, ClassifierProfile, OnnxClassifier};
use crate::detector::{FaceLocalizer, FaceRegion, SeetaFaceLocalizer};
use crate::eyes::EyeStateEstimator;
use crate::landmarks::{FaceMeshTracker, LandmarkTracker};
use crate::overlay::annotate;
use crate::pose::HeadPoseSolver;
use crate::status::{unix_seconds, StatusRecord, StatusStore};
use crate::{DmsConfig, DmsError};

/// Runs every stage on one frame and publishes the merged record.
///
/// Only the first valid region from the localizer is used: the cabin is
/// assumed to hold a single driver, and extra detections are dropped.
pub struct FrameOrchestrator {
    localizer: Box<dyn FaceLocalizer>,
    tracker: Box<dyn LandmarkTracker>,
    pose: HeadPoseSolver,
    eyes: EyeStateEstimator,
    emotion: Arc<dyn Classifier>,
    drowsiness: Arc<dyn Classifier>,
    store: StatusStore,
    annotate: bool,
}

impl FrameOrchestrator {
    pub fn new(
        config: &DmsConfig,
        localizer: Box<dyn FaceLocalizer>,
        tracker: Box<dyn LandmarkTracker>,
        emotion: Arc<dyn Classifier>,
        drowsiness: Arc<dyn Classifier>,
        store: StatusStore,
    ) -> Result<Self, DmsError> {
        config.validate()?;
        Ok(Self {
            localizer,
            tracker,
            pose: HeadPoseSolver::new(),
            eyes: EyeStateEstimator::new(config.ear_threshold),
            emotion,
            drowsiness,
            store,
            annotate: config.annotate,
        })
    }

    /// Load every model named in `config`
    pub fn from_config(config: &DmsConfig, store: StatusStore) -> Result<Self, DmsError> {
        config.validate()?;
        let model_path = |path: &Option<std::path::PathBuf>, key: &str| {
            path.clone()
                .ok_or_else(|| DmsError::Config(format!("{key} is not set")))
        };

        let localizer = SeetaFaceLocalizer::new(config)?;
        let tracker = FaceMeshTracker::new(config)?;
        let emotion = OnnxClassifier::load(
            &model_path(&config.emotion_model_path, "emotion_model_path")?,
            ClassifierProfile::emotion(config.emotion_input),
        )?;
        let drowsiness = OnnxClassifier::load(
            &model_path(&config.drowsiness_model_path, "drowsiness_model_path")?,
            ClassifierProfile::drowsiness(config.drowsiness_input),
        )?;
        info!("DMS models loaded");

        Self::new(
            config,
            Box::new(localizer),
            Box::new(tracker),
            Arc::new(emotion),
            Arc::new(drowsiness),
            store,
        )
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn emotion_classifier(&self) -> Arc<dyn Classifier> {
        Arc::clone(&self.emotion)
    }

    pub fn drowsiness_classifier(&self) -> Arc<dyn Classifier> {
        Arc::clone(&self.drowsiness)
    }

    /// Process one frame. A malformed frame is rejected before anything is
    /// published; every other outcome yields a complete record.
    pub fn run_pipeline(&mut self, frame: &VideoFrame) -> Result<(RgbImage, StatusRecord), DmsError> {
        frame.validate().map_err(|e| DmsError::InvalidFrame(e.to_string()))?;
        let image = frame
            .to_rgb_image()
            .map_err(|e| DmsError::InvalidFrame(e.to_string()))?;

        let face = primary_face(self.localizer.as_ref(), frame);
        // The tracker runs on every frame to keep its own region of interest
        let landmarks = self.tracker.track(frame);

        let mut record = StatusRecord::default();
        if let Some(face) = &face {
            record.face_detected = true;
            if let Some(landmarks) = &landmarks {
                record.head_pose = self.pose.solve(landmarks, frame.width, frame.height);
                record.eyes = Some(self.eyes.estimate_pair(landmarks, frame.width, frame.height));
            } else {
                debug!("Face located but not tracked (frame {})", frame.sequence);
            }

            let crop = image::imageops::crop_imm(&image, face.x, face.y, face.width, face.height).to_image();
            record.emotion = run_classifier(&crop, self.emotion.as_ref(), ClassificationResult::emotion_sentinel);
            record.drowsiness = run_classifier(&crop, self.drowsiness.as_ref(), ClassificationResult::drowsiness_sentinel);
        }

        record.ts = unix_seconds();
        self.store.publish(record.clone());

        let output = if self.annotate {
            annotate(&image, &record, face.as_ref(), landmarks.as_ref().filter(|_| record.face_detected))
        } else {
            image
        };
        Ok((output, record))
    }

    /// Latest published record
    pub fn current_status(&self) -> StatusRecord {
        self.store.snapshot()
    }
}

fn run_classifier(crop: &RgbImage, classifier: &dyn Classifier, sentinel: fn() -> ClassificationResult) -> ClassificationResult {
    classify(crop, classifier).unwrap_or_else(|e| {
        warn!("{} classifier failed: {}", classifier.profile().name, e);
        sentinel()
    })
}

/// First valid region the localizer reports for `frame`
pub fn primary_face(localizer: &dyn FaceLocalizer, frame: &VideoFrame) -> Option<FaceRegion> {
    localizer.locate(frame).into_iter().find(|f| f.valid)
}
