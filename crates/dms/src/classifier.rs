//! Face-crop classifiers (emotion, drowsiness) and the adapter feeding them

use std::path::Path;

use camera_capture::frame::luminance;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ClassifierInput;
use crate::onnx::OnnxModel;
use crate::DmsError;

pub const EMOTION_LABELS: [&str; 7] = ["Angry", "Disgust", "Fear", "Happy", "Sad", "Surprise", "Neutral"];
pub const DROWSINESS_LABELS: [&str; 2] = ["Awake", "Drowsy"];

/// Label shown when no emotion could be measured
pub const NO_LABEL: &str = "—";

/// Winning label and its probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    pub fn emotion_sentinel() -> Self {
        Self::new(NO_LABEL, 0.0)
    }

    pub fn drowsiness_sentinel() -> Self {
        Self::new(DROWSINESS_LABELS[0], 0.0)
    }
}

/// What a classifier expects and what its outputs mean
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierProfile {
    pub name: String,
    pub input: ClassifierInput,
    pub labels: Vec<String>,
}

impl ClassifierProfile {
    pub fn new(name: impl Into<String>, input: ClassifierInput, labels: &[&str]) -> Self {
        Self {
            name: name.into(),
            input,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn emotion(input: ClassifierInput) -> Self {
        Self::new("emotion", input, &EMOTION_LABELS)
    }

    pub fn drowsiness(input: ClassifierInput) -> Self {
        Self::new("drowsiness", input, &DROWSINESS_LABELS)
    }
}

/// Opaque model: a `[1, H, W, C]` tensor in, one probability per label out
pub trait Classifier: Send + Sync {
    fn profile(&self) -> &ClassifierProfile;

    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, DmsError>;
}

/// Resize `crop` to the classifier input, convert its color space and scale to [0, 1]
pub fn prepare_input(crop: &RgbImage, input: &ClassifierInput) -> Result<Array4<f32>, DmsError> {
    if crop.width() == 0 || crop.height() == 0 {
        return Err(DmsError::InvalidFrame("empty classifier crop".into()));
    }
    let resized = image::imageops::resize(crop, input.width, input.height, FilterType::Triangle);

    let data: Vec<f32> = match input.channels {
        1 => resized.pixels().map(|p| luminance(&p.0) as f32 / 255.0).collect(),
        3 => resized.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        n => return Err(DmsError::Config(format!("unsupported channel count {n}"))),
    };

    Array4::from_shape_vec(
        (1, input.height as usize, input.width as usize, input.channels as usize),
        data,
    )
    .map_err(|e| DmsError::Inference(format!("input shape: {e}")))
}

/// Highest-probability label. NaN never wins.
pub fn top_label(probabilities: &[f32], labels: &[String]) -> Result<ClassificationResult, DmsError> {
    if probabilities.len() != labels.len() {
        return Err(DmsError::Inference(format!(
            "{} probabilities for {} labels",
            probabilities.len(),
            labels.len()
        )));
    }

    let rank = |p: f32| if p.is_nan() { f32::NEG_INFINITY } else { p };
    let (index, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, b)) if rank(b) >= rank(p) => best,
            _ => Some((i, p)),
        })
        .ok_or_else(|| DmsError::Inference("classifier has no labels".into()))?;

    if confidence.is_nan() {
        return Err(DmsError::Inference("all probabilities are NaN".into()));
    }

    Ok(ClassificationResult::new(labels[index].clone(), confidence))
}

/// Normalize `crop` for `classifier`, run it and pick the winning label
pub fn classify(crop: &RgbImage, classifier: &dyn Classifier) -> Result<ClassificationResult, DmsError> {
    let profile = classifier.profile();
    let input = prepare_input(crop, &profile.input)?;
    let probabilities = classifier.predict(&input)?;
    let result = top_label(&probabilities, &profile.labels)?;
    debug!("{} -> {} ({:.2})", profile.name, result.label, result.confidence);
    Ok(result)
}

/// Classifier backed by an ONNX model
pub struct OnnxClassifier {
    profile: ClassifierProfile,
    model: OnnxModel,
}

impl OnnxClassifier {
    pub fn load(path: &Path, profile: ClassifierProfile) -> Result<Self, DmsError> {
        let input = profile.input;
        let model = OnnxModel::load(
            path,
            [1, input.height as usize, input.width as usize, input.channels as usize],
        )?;
        info!("Loaded {} classifier ({} labels)", profile.name, profile.labels.len());
        Ok(Self { profile, model })
    }
}

impl Classifier for OnnxClassifier {
    fn profile(&self) -> &ClassifierProfile {
        &self.profile
    }

    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, DmsError> {
        self.model
            .run(input.iter().copied().collect())?
            .into_iter()
            .next()
            .ok_or_else(|| DmsError::Inference(format!("{} model produced no output", self.profile.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Returns fixed probabilities and remembers nothing
    struct Fixed {
        profile: ClassifierProfile,
        output: Vec<f32>,
    }

    impl Classifier for Fixed {
        fn profile(&self) -> &ClassifierProfile {
            &self.profile
        }

        fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, DmsError> {
            let i = self.profile.input;
            assert_eq!(input.shape(), &[1, i.height as usize, i.width as usize, i.channels as usize]);
            Ok(self.output.clone())
        }
    }

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_grayscale_input_is_scaled() {
        let crop = RgbImage::from_pixel(10, 20, Rgb([255, 255, 255]));
        let tensor = prepare_input(&crop, &ClassifierInput::new(48, 48, 1)).unwrap();
        assert_eq!(tensor.shape(), &[1, 48, 48, 1]);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(tensor.iter().all(|v| *v > 0.99));
    }

    #[test]
    fn test_color_input_keeps_channels() {
        let crop = RgbImage::from_pixel(30, 30, Rgb([255, 0, 51]));
        let tensor = prepare_input(&crop, &ClassifierInput::new(8, 4, 3)).unwrap();
        assert_eq!(tensor.shape(), &[1, 8, 4, 3]);
        assert!((tensor[[0, 3, 2, 0]] - 1.0).abs() < 1e-2);
        assert!(tensor[[0, 3, 2, 1]].abs() < 1e-2);
        assert!((tensor[[0, 3, 2, 2]] - 0.2).abs() < 1e-2);
    }

    #[test]
    fn test_empty_crop_is_rejected() {
        let crop = RgbImage::new(0, 0);
        assert!(matches!(
            prepare_input(&crop, &ClassifierInput::new(48, 48, 1)),
            Err(DmsError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_top_label() {
        let result = top_label(&[0.1, 0.7, 0.2], &labels(&["a", "b", "c"])).unwrap();
        assert_eq!(result, ClassificationResult::new("b", 0.7));
    }

    #[test]
    fn test_top_label_ignores_nan_and_keeps_first_tie() {
        let result = top_label(&[f32::NAN, 0.4, 0.4], &labels(&["a", "b", "c"])).unwrap();
        assert_eq!(result.label, "b");
        assert!(top_label(&[f32::NAN], &labels(&["a"])).is_err());
    }

    #[test]
    fn test_top_label_length_mismatch() {
        assert!(matches!(
            top_label(&[0.5, 0.5], &labels(&["a", "b", "c"])),
            Err(DmsError::Inference(_))
        ));
    }

    #[test]
    fn test_classify_is_deterministic() {
        let classifier = Fixed {
            profile: ClassifierProfile::emotion(ClassifierInput::new(48, 48, 1)),
            output: vec![0.05, 0.05, 0.1, 0.6, 0.1, 0.05, 0.05],
        };
        let crop = RgbImage::from_pixel(64, 64, Rgb([120, 80, 40]));
        let first = classify(&crop, &classifier).unwrap();
        assert_eq!(first, ClassificationResult::new("Happy", 0.6));
        assert_eq!(classify(&crop, &classifier).unwrap(), first);
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(ClassificationResult::emotion_sentinel().label, "—");
        assert_eq!(ClassificationResult::drowsiness_sentinel(), ClassificationResult::new("Awake", 0.0));
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let profile = ClassifierProfile::drowsiness(ClassifierInput::new(224, 224, 3));
        assert!(matches!(
            OnnxClassifier::load(Path::new("/no/such/drowsy.onnx"), profile),
            Err(DmsError::ModelLoad(_))
        ));
    }
}
