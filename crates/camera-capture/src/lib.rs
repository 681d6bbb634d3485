//! Camera Capture Library for the Driver Monitor
//!
//! Provides the frame model and the frame sources the capture loop reads from:
//! - Live capture devices (`device` feature, on by default)
//! - Still-image sequences replayed at a fixed rate
//! - In-memory frame queues
//! - JPEG/PNG decoding and JPEG encoding for the live feed

#[cfg(feature = "device")]
pub mod device;
pub mod frame;
pub mod source;

#[cfg(feature = "device")]
pub use device::CameraSource;
pub use frame::{decode_image, encode_jpeg, VideoFrame};
pub use source::{FrameSource, ImageSequenceSource, MemorySource};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("Frame encode failed: {0}")]
    Encode(String),
}

/// Where frames come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureInput {
    /// Live capture device `device`
    #[default]
    Camera,
    /// Still images replayed from `source`
    Stills,
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub input: CaptureInput,
    /// Capture device index
    pub device: u32,
    /// Directory of still frames to replay
    pub source: PathBuf,
    /// Replay FPS (0 = as fast as the pipeline runs)
    pub fps: u32,
    /// Restart from the first frame at end of stream
    pub looped: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            input: CaptureInput::Camera,
            device: 0,
            source: PathBuf::from("frames"),
            fps: 15,
            looped: true,
        }
    }
}

impl CameraConfig {
    /// Replay the stills in `source` instead of opening a device
    pub fn still_images(source: impl Into<PathBuf>) -> Self {
        Self {
            input: CaptureInput::Stills,
            source: source.into(),
            ..Default::default()
        }
    }
}

/// Open the source `config` selects. Failing here is fatal for the caller:
/// nothing has been captured yet.
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    match config.input {
        #[cfg(feature = "device")]
        CaptureInput::Camera => Ok(Box::new(CameraSource::open(config.device)?)),
        #[cfg(not(feature = "device"))]
        CaptureInput::Camera => Err(CameraError::Open(
            "built without the `device` feature".into(),
        )),
        CaptureInput::Stills => Ok(Box::new(ImageSequenceSource::open(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_open_source_replays_stills() {
        let tmp = tempfile::tempdir().unwrap();
        let jpeg = encode_jpeg(&RgbImage::new(4, 4), 90).unwrap();
        std::fs::write(tmp.path().join("0001.jpg"), jpeg).unwrap();

        let config = CameraConfig {
            fps: 0,
            looped: false,
            ..CameraConfig::still_images(tmp.path())
        };
        let mut source = open_source(&config).unwrap();
        assert_eq!(source.next_frame().unwrap().unwrap().width, 4);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_open_source_missing_camera_is_fatal() {
        let config = CameraConfig {
            device: u32::MAX,
            ..Default::default()
        };
        assert!(matches!(open_source(&config), Err(CameraError::Open(_))));
    }

    #[test]
    fn test_input_parses_lowercase() {
        let config: CameraConfig = serde_json::from_str(r#"{"input": "stills", "source": "clips"}"#).unwrap();
        assert_eq!(config.input, CaptureInput::Stills);
        assert_eq!(config.device, 0);
    }
}
