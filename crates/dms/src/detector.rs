//! Face localization

use std::path::Path;

use camera_capture::frame::VideoFrame;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{DmsConfig, DmsError};

/// Axis-aligned face rectangle in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector score, not comparable across detectors
    pub score: f32,
    /// False when the detection clipped to nothing inside the frame
    pub valid: bool,
}

impl FaceRegion {
    /// Clip a raw detection (which may hang off the frame edge) to the frame
    pub fn clipped(x: i64, y: i64, width: i64, height: i64, score: f32, frame_width: u32, frame_height: u32) -> Self {
        let x0 = x.clamp(0, frame_width as i64);
        let y0 = y.clamp(0, frame_height as i64);
        let x1 = (x + width).clamp(0, frame_width as i64);
        let y1 = (y + height).clamp(0, frame_height as i64);
        let width = (x1 - x0).max(0) as u32;
        let height = (y1 - y0).max(0) as u32;

        Self {
            x: x0 as u32,
            y: y0 as u32,
            width,
            height,
            score,
            valid: width > 0 && height > 0,
        }
    }
}

/// Finds face rectangles in a frame.
///
/// Results come back in the detector's own scan order; no ranking by size or
/// score is implied. An empty result is the normal "no face" outcome.
pub trait FaceLocalizer: Send {
    fn locate(&self, frame: &VideoFrame) -> Vec<FaceRegion>;
}

/// SeetaFace funnel-structured cascade (via `rustface`) on the grayscale frame
pub struct SeetaFaceLocalizer {
    model: rustface::Model,
    min_face_size: u32,
    score_threshold: f64,
}

impl SeetaFaceLocalizer {
    pub fn new(config: &DmsConfig) -> Result<Self, DmsError> {
        let path = config
            .face_model_path
            .as_deref()
            .ok_or_else(|| DmsError::Config("face_model_path is not set".into()))?;
        Self::from_path(path, config.min_face_size)
    }

    pub fn from_path(path: &Path, min_face_size: u32) -> Result<Self, DmsError> {
        info!("Loading face detection model from {}", path.display());
        let file = std::fs::File::open(path)
            .map_err(|e| DmsError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let model = rustface::read_model(std::io::BufReader::new(file))
            .map_err(|e| DmsError::ModelLoad(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            model,
            min_face_size: min_face_size.max(20),
            score_threshold: 2.0,
        })
    }
}

impl FaceLocalizer for SeetaFaceLocalizer {
    fn locate(&self, frame: &VideoFrame) -> Vec<FaceRegion> {
        let gray = match frame.to_gray_image() {
            Ok(gray) => gray,
            Err(e) => {
                warn!("Skipping face localization: {}", e);
                return Vec::new();
            }
        };

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(self.score_threshold);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), frame.width, frame.height));
        debug!("Localizer found {} face(s)", faces.len());

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceRegion::clipped(
                    bbox.x() as i64,
                    bbox.y() as i64,
                    bbox.width() as i64,
                    bbox.height() as i64,
                    face.score() as f32,
                    frame.width,
                    frame.height,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_inside_frame_is_unchanged() {
        let region = FaceRegion::clipped(10, 20, 30, 40, 1.0, 640, 480);
        assert_eq!((region.x, region.y, region.width, region.height), (10, 20, 30, 40));
        assert!(region.valid);
    }

    #[test]
    fn test_clip_trims_overhang() {
        let region = FaceRegion::clipped(-10, 460, 50, 50, 1.0, 640, 480);
        assert_eq!((region.x, region.y, region.width, region.height), (0, 460, 40, 20));
        assert!(region.valid);
    }

    #[test]
    fn test_clip_outside_frame_is_invalid() {
        let region = FaceRegion::clipped(700, 10, 50, 50, 1.0, 640, 480);
        assert!(!region.valid);
        assert_eq!((region.width, region.height), (0, 50));
    }

    #[test]
    fn test_missing_model_path_is_config_error() {
        assert!(matches!(
            SeetaFaceLocalizer::new(&DmsConfig::default()),
            Err(DmsError::Config(_))
        ));
    }

    #[test]
    fn test_unreadable_model_is_load_error() {
        assert!(matches!(
            SeetaFaceLocalizer::from_path(Path::new("/no/such/seeta.bin"), 40),
            Err(DmsError::ModelLoad(_))
        ));
    }
}
