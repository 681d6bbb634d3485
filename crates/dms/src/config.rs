//! DMS configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::DmsError;

/// Input tensor shape a classifier expects (NHWC, batch of one)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierInput {
    pub height: u32,
    pub width: u32,
    /// 1 for grayscale, 3 for RGB
    pub channels: u32,
}

impl ClassifierInput {
    pub const fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }
}

/// DMS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Eye aspect ratio below which an eye counts as closed
    pub ear_threshold: f64,

    /// Minimum face-presence score for the landmark tracker
    pub tracking_confidence: f32,

    /// Smallest face the localizer searches for (pixels)
    pub min_face_size: u32,

    /// Model paths
    pub face_model_path: Option<PathBuf>,
    pub landmark_model_path: Option<PathBuf>,
    pub emotion_model_path: Option<PathBuf>,
    pub drowsiness_model_path: Option<PathBuf>,

    /// Classifier input shapes
    pub emotion_input: ClassifierInput,
    pub drowsiness_input: ClassifierInput,

    /// Draw the overlay on published frames
    pub annotate: bool,

    /// JPEG quality for the live feed
    pub jpeg_quality: u8,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.22,
            tracking_confidence: 0.5,
            min_face_size: 20,
            face_model_path: None,
            landmark_model_path: None,
            emotion_model_path: None,
            drowsiness_model_path: None,
            emotion_input: ClassifierInput::new(48, 48, 1),
            drowsiness_input: ClassifierInput::new(224, 224, 3),
            annotate: true,
            jpeg_quality: 80,
        }
    }
}

impl DmsConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), DmsError> {
        if !(self.ear_threshold > 0.0 && self.ear_threshold.is_finite()) {
            return Err(DmsError::Config(format!(
                "ear_threshold must be positive, got {}",
                self.ear_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.tracking_confidence) {
            return Err(DmsError::Config(format!(
                "tracking_confidence must be within [0, 1], got {}",
                self.tracking_confidence
            )));
        }
        for (name, input) in [
            ("emotion_input", &self.emotion_input),
            ("drowsiness_input", &self.drowsiness_input),
        ] {
            if input.height == 0 || input.width == 0 {
                return Err(DmsError::Config(format!("{name} has a zero spatial size")));
            }
            if input.channels != 1 && input.channels != 3 {
                return Err(DmsError::Config(format!(
                    "{name} channels must be 1 or 3, got {}",
                    input.channels
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = DmsConfig::default();
        assert_eq!(config.ear_threshold, 0.22);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_channel_count() {
        let config = DmsConfig {
            emotion_input: ClassifierInput::new(48, 48, 2),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DmsError::Config(_))));
    }

    #[test]
    fn test_rejects_non_positive_threshold() {
        let config = DmsConfig {
            ear_threshold: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: DmsConfig = serde_json::from_str(r#"{"ear_threshold": 0.3}"#).unwrap();
        assert_eq!(config.ear_threshold, 0.3);
        assert_eq!(config.emotion_input, ClassifierInput::new(48, 48, 1));
        assert!(config.annotate);
    }
}
