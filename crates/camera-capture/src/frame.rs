//! Video frame types and processing

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, RgbImage};

use crate::CameraError;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the source was opened)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Wrap a decoded RGB image
    pub fn from_rgb_image(image: RgbImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, timestamp_ns, sequence)
    }

    /// Check that the buffer matches the declared dimensions
    pub fn validate(&self) -> Result<(), CameraError> {
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::Format(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * 3;
        if self.data.len() != expected {
            return Err(CameraError::Format(format!(
                "buffer holds {} bytes, {}x{} RGB needs {}",
                self.data.len(),
                self.width,
                self.height,
                expected
            )));
        }
        Ok(())
    }

    /// Grayscale copy as an image buffer
    pub fn to_gray_image(&self) -> Result<GrayImage, CameraError> {
        self.validate()?;
        let gray = self.data.chunks_exact(3).map(luminance).collect();
        GrayImage::from_raw(self.width, self.height, gray)
            .ok_or_else(|| CameraError::Format("grayscale buffer size mismatch".into()))
    }

    /// Copy of the pixel data as an image buffer
    pub fn to_rgb_image(&self) -> Result<RgbImage, CameraError> {
        self.validate()?;
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| CameraError::Format("RGB buffer size mismatch".into()))
    }
}

/// Luminance formula: 0.299*R + 0.587*G + 0.114*B
pub fn luminance(pixel: &[u8]) -> u8 {
    (pixel[0] as f32 * 0.299 + pixel[1] as f32 * 0.587 + pixel[2] as f32 * 0.114) as u8
}

/// Decode a JPEG/PNG still to an RGB frame
pub fn decode_image(bytes: &[u8], timestamp_ns: u64, sequence: u32) -> Result<VideoFrame, CameraError> {
    let img = image::load_from_memory(bytes).map_err(|e| CameraError::Decode(e.to_string()))?;
    Ok(VideoFrame::from_rgb_image(img.to_rgb8(), timestamp_ns, sequence))
}

/// Encode an RGB image as baseline JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CameraError> {
    let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| CameraError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> VideoFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 128]);
            }
        }
        VideoFrame::new(data, width, height, 0, 0)
    }

    #[test]
    fn test_validate_rejects_short_buffer() {
        let frame = VideoFrame::new(vec![0; 10], 4, 4, 0, 0);
        assert!(matches!(frame.validate(), Err(CameraError::Format(_))));
        assert!(frame.to_rgb_image().is_err());
    }

    #[test]
    fn test_grayscale_weights() {
        let frame = VideoFrame::new(vec![255, 0, 0, 0, 255, 0, 0, 0, 255], 3, 1, 0, 0);
        assert_eq!(frame.to_gray_image().unwrap().into_raw(), vec![76, 149, 29]);
    }

    #[test]
    fn test_jpeg_encode_then_decode_keeps_dimensions() {
        let frame = gradient(32, 24);
        let jpeg = encode_jpeg(&frame.to_rgb_image().unwrap(), 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = decode_image(&jpeg, 7, 3).unwrap();
        assert_eq!((decoded.width, decoded.height), (32, 24));
        assert_eq!(decoded.sequence, 3);
    }

    proptest::proptest! {
        #[test]
        fn prop_validate_matches_buffer_size(w in 0u32..12, h in 0u32..12, extra in 0usize..4) {
            let exact = VideoFrame::new(vec![0; (w * h * 3) as usize], w, h, 0, 0);
            proptest::prop_assert_eq!(exact.validate().is_ok(), w > 0 && h > 0);

            let padded = VideoFrame::new(vec![0; (w * h * 3) as usize + extra], w, h, 0, 0);
            proptest::prop_assert_eq!(padded.validate().is_ok(), w > 0 && h > 0 && extra == 0);
        }
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        assert!(matches!(
            decode_image(b"not an image", 0, 0),
            Err(CameraError::Decode(_))
        ));
    }
}
