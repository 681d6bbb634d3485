//! Per-eye openness from the eye aspect ratio

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geometry::eye_aspect_ratio;
use crate::landmarks::{anchors, LandmarkSet};

/// Which eye, by image side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub fn contour(&self) -> &'static [usize; 6] {
        match self {
            Eye::Left => &anchors::LEFT_EYE,
            Eye::Right => &anchors::RIGHT_EYE,
        }
    }
}

/// Openness of one eye
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EyeStatus {
    Open,
    Closed,
    /// The contour collapsed horizontally, so no ratio could be formed
    Unknown,
}

impl EyeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EyeStatus::Open => "Open",
            EyeStatus::Closed => "Closed",
            EyeStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EyeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyePair {
    pub left: EyeStatus,
    pub right: EyeStatus,
}

/// Thresholds the eye aspect ratio: strictly below the threshold is closed
#[derive(Debug, Clone, Copy)]
pub struct EyeStateEstimator {
    threshold: f64,
}

impl Default for EyeStateEstimator {
    fn default() -> Self {
        Self::new(0.22)
    }
}

impl EyeStateEstimator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Aspect ratio of `eye` in pixel space
    pub fn ratio(&self, landmarks: &LandmarkSet, eye: Eye, width: u32, height: u32) -> Option<f64> {
        let contour = landmarks.pixels(eye.contour(), width, height)?;
        eye_aspect_ratio(&contour)
    }

    pub fn classify(&self, ratio: Option<f64>) -> EyeStatus {
        match ratio {
            Some(r) if r < self.threshold => EyeStatus::Closed,
            Some(_) => EyeStatus::Open,
            None => EyeStatus::Unknown,
        }
    }

    pub fn estimate(&self, landmarks: &LandmarkSet, eye: Eye, width: u32, height: u32) -> EyeStatus {
        let ratio = self.ratio(landmarks, eye, width, height);
        trace!("{:?} eye ratio {:?}", eye, ratio);
        self.classify(ratio)
    }

    pub fn estimate_pair(&self, landmarks: &LandmarkSet, width: u32, height: u32) -> EyePair {
        EyePair {
            left: self.estimate(landmarks, Eye::Left, width, height),
            right: self.estimate(landmarks, Eye::Right, width, height),
        }
    }
}
