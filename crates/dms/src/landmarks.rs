//! Dense facial landmarks and the face-mesh tracker producing them

use camera_capture::frame::VideoFrame;
use image::imageops::FilterType;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::detector::FaceRegion;
use crate::onnx::OnnxModel;
use crate::{DmsConfig, DmsError};

/// Points in the reference face mesh
pub const LANDMARK_COUNT: usize = 468;

/// Mesh indices with a fixed meaning. These are a contract with the
/// face-mesh topology and must not be renumbered.
pub mod anchors {
    pub const NOSE_TIP: usize = 1;
    pub const CHIN: usize = 152;
    /// Outer corner of the subject's left eye
    pub const LEFT_EYE_OUTER: usize = 263;
    /// Outer corner of the subject's right eye
    pub const RIGHT_EYE_OUTER: usize = 33;
    pub const LEFT_MOUTH_CORNER: usize = 287;
    pub const RIGHT_MOUTH_CORNER: usize = 57;

    /// Head-pose correspondences, in the order of the 3D face model
    pub const POSE: [usize; 6] = [
        NOSE_TIP,
        CHIN,
        LEFT_EYE_OUTER,
        RIGHT_EYE_OUTER,
        LEFT_MOUTH_CORNER,
        RIGHT_MOUTH_CORNER,
    ];

    /// Contour of the eye on the image-left side: corner, upper lid x2,
    /// corner, lower lid x2
    pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];

    /// Contour of the eye on the image-right side, same point order
    pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
}

/// A single keypoint. `x` and `z` are normalized by frame width, `y` by height.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Ordered face-mesh keypoints for one face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    /// Needs at least [`LANDMARK_COUNT`] points; refined meshes carry extra
    /// iris points after the base topology and are accepted as is.
    pub fn new(points: Vec<Landmark>) -> Result<Self, DmsError> {
        if points.len() < LANDMARK_COUNT {
            return Err(DmsError::InvalidLandmarks(points.len()));
        }
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [Landmark] {
        &mut self.points
    }

    /// Landmark `index` in pixel coordinates of a `width` x `height` frame
    pub fn pixel(&self, index: usize, width: u32, height: u32) -> Option<Point2<f64>> {
        self.get(index)
            .map(|lm| Point2::new(lm.x as f64 * width as f64, lm.y as f64 * height as f64))
    }

    /// Several landmarks in pixel coordinates, in the order given
    pub fn pixels<const N: usize>(&self, indices: &[usize; N], width: u32, height: u32) -> Option<[Point2<f64>; N]> {
        let mut out = [Point2::origin(); N];
        for (slot, &index) in out.iter_mut().zip(indices) {
            *slot = self.pixel(index, width, height)?;
        }
        Some(out)
    }

    /// Normalized bounding box `(min_x, min_y, max_x, max_y)`
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        self.points.iter().fold(
            (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }
}

/// Produces landmarks for the single tracked face, with its own notion of
/// where that face is. It does not consume the localizer's rectangle, so the
/// two may disagree on any given frame.
pub trait LandmarkTracker: Send {
    fn track(&mut self, frame: &VideoFrame) -> Option<LandmarkSet>;

    /// Forget any tracking state
    fn reset(&mut self) {}
}

/// Face-mesh input edge length
const MESH_INPUT: u32 = 192;
/// How far the next region of interest extends past the last landmarks
const ROI_SCALE: f32 = 1.5;

/// 468-point face mesh regressor run on a self-maintained region of interest
pub struct FaceMeshTracker {
    model: OnnxModel,
    min_presence: f32,
    /// Last region and the frame size it was clipped to
    roi: Option<(FaceRegion, (u32, u32))>,
}

impl FaceMeshTracker {
    pub fn new(config: &DmsConfig) -> Result<Self, DmsError> {
        let path = config
            .landmark_model_path
            .as_deref()
            .ok_or_else(|| DmsError::Config("landmark_model_path is not set".into()))?;
        let side = MESH_INPUT as usize;
        Ok(Self {
            model: OnnxModel::load(path, [1, side, side, 3])?,
            min_presence: config.tracking_confidence,
            roi: None,
        })
    }

    fn infer(&self, frame: &VideoFrame, roi: &FaceRegion) -> Result<Option<LandmarkSet>, DmsError> {
        let image = frame
            .to_rgb_image()
            .map_err(|e| DmsError::InvalidFrame(e.to_string()))?;
        let crop = image::imageops::crop_imm(&image, roi.x, roi.y, roi.width, roi.height).to_image();
        let resized = image::imageops::resize(&crop, MESH_INPUT, MESH_INPUT, FilterType::Triangle);
        let input: Vec<f32> = resized.as_raw().iter().map(|&v| v as f32 / 255.0).collect();

        let outputs = self.model.run(input)?;
        Ok(decode_mesh(&outputs, roi, frame.width, frame.height, self.min_presence))
    }
}

impl LandmarkTracker for FaceMeshTracker {
    fn track(&mut self, frame: &VideoFrame) -> Option<LandmarkSet> {
        let roi = starting_region(self.roi.as_ref(), frame.width, frame.height);
        if !roi.valid {
            return None;
        }

        match self.infer(frame, &roi) {
            Ok(Some(landmarks)) => {
                self.roi = roi_around(&landmarks, frame.width, frame.height)
                    .map(|next| (next, (frame.width, frame.height)));
                trace!("Tracking face at {:?}", self.roi);
                Some(landmarks)
            }
            Ok(None) => {
                if self.roi.is_some() {
                    debug!("Face mesh lost track");
                }
                self.roi = None;
                None
            }
            Err(e) => {
                warn!("Face mesh inference failed: {}", e);
                self.roi = None;
                None
            }
        }
    }

    fn reset(&mut self) {
        self.roi = None;
    }
}

/// Region to run the mesh on: the tracked one while frames keep the size it
/// was clipped to, otherwise the centered square
pub fn starting_region(tracked: Option<&(FaceRegion, (u32, u32))>, width: u32, height: u32) -> FaceRegion {
    match tracked {
        Some((region, size)) if *size == (width, height) => *region,
        Some((_, (w, h))) => {
            debug!("Frame size changed from {}x{} to {}x{}, restarting tracking", w, h, width, height);
            centered_square(width, height)
        }
        None => centered_square(width, height),
    }
}

/// Largest centered square of the frame, where tracking starts
pub fn centered_square(width: u32, height: u32) -> FaceRegion {
    let side = width.min(height);
    FaceRegion::clipped(
        ((width - side) / 2) as i64,
        ((height - side) / 2) as i64,
        side as i64,
        side as i64,
        0.0,
        width,
        height,
    )
}

/// Square region around the landmarks, enlarged by [`ROI_SCALE`] and clipped
pub fn roi_around(landmarks: &LandmarkSet, width: u32, height: u32) -> Option<FaceRegion> {
    let (x0, y0, x1, y1) = landmarks.bounds();
    let (x0, x1) = (x0 * width as f32, x1 * width as f32);
    let (y0, y1) = (y0 * height as f32, y1 * height as f32);
    let side = (x1 - x0).max(y1 - y0) * ROI_SCALE;
    if !side.is_finite() || side < 1.0 {
        return None;
    }

    let cx = (x0 + x1) / 2.0;
    let cy = (y0 + y1) / 2.0;
    let region = FaceRegion::clipped(
        (cx - side / 2.0).round() as i64,
        (cy - side / 2.0).round() as i64,
        side.round() as i64,
        side.round() as i64,
        0.0,
        width,
        height,
    );
    region.valid.then_some(region)
}

/// Turn raw mesh outputs into frame-normalized landmarks.
///
/// Expects one output with `3 * N >= 3 * LANDMARK_COUNT` coordinates in
/// model-input pixels and one single-value presence logit.
pub fn decode_mesh(outputs: &[Vec<f32>], roi: &FaceRegion, width: u32, height: u32, min_presence: f32) -> Option<LandmarkSet> {
    let coords = outputs
        .iter()
        .find(|o| o.len() >= LANDMARK_COUNT * 3 && o.len() % 3 == 0)?;
    let presence = outputs
        .iter()
        .find(|o| o.len() == 1)
        .map(|o| sigmoid(o[0]))
        .unwrap_or(1.0);

    if presence < min_presence {
        trace!("Face presence {:.2} below {:.2}", presence, min_presence);
        return None;
    }

    let input = MESH_INPUT as f32;
    let sx = roi.width as f32 / input;
    let sy = roi.height as f32 / input;
    let points = coords
        .chunks_exact(3)
        .map(|c| {
            Landmark::new(
                (roi.x as f32 + c[0] * sx) / width as f32,
                (roi.y as f32 + c[1] * sy) / height as f32,
                c[2] * sx / width as f32,
            )
        })
        .collect();

    LandmarkSet::new(points).ok()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_set(x: f32, y: f32) -> LandmarkSet {
        LandmarkSet::new(vec![Landmark::new(x, y, 0.0); LANDMARK_COUNT]).unwrap()
    }

    #[test]
    fn test_rejects_short_sets() {
        assert!(matches!(
            LandmarkSet::new(vec![Landmark::default(); 10]),
            Err(DmsError::InvalidLandmarks(10))
        ));
        assert!(LandmarkSet::new(vec![Landmark::default(); 478]).is_ok());
    }

    #[test]
    fn test_pixel_scales_by_frame() {
        let set = flat_set(0.5, 0.25);
        let p = set.pixel(anchors::NOSE_TIP, 640, 480).unwrap();
        assert_eq!((p.x, p.y), (320.0, 120.0));
        assert!(set.pixel(LANDMARK_COUNT, 640, 480).is_none());

        let eye = set.pixels(&anchors::LEFT_EYE, 100, 100).unwrap();
        assert!(eye.iter().all(|p| p.x == 50.0 && p.y == 25.0));
    }

    #[test]
    fn test_anchor_indices_are_inside_mesh() {
        for index in anchors::POSE.iter().chain(&anchors::LEFT_EYE).chain(&anchors::RIGHT_EYE) {
            assert!(*index < LANDMARK_COUNT);
        }
    }

    #[test]
    fn test_centered_square() {
        let roi = centered_square(640, 480);
        assert_eq!((roi.x, roi.y, roi.width, roi.height), (80, 0, 480, 480));
        assert!(roi.valid);
    }

    #[test]
    fn test_starting_region_follows_frame_size() {
        let tracked = (FaceRegion::clipped(400, 300, 200, 150, 0.0, 640, 480), (640, 480));

        let same = starting_region(Some(&tracked), 640, 480);
        assert_eq!((same.x, same.y, same.width, same.height), (400, 300, 200, 150));

        // a region from a larger frame would crop to nothing on this one
        let smaller = starting_region(Some(&tracked), 320, 240);
        assert_eq!((smaller.x, smaller.y, smaller.width, smaller.height), (40, 0, 240, 240));
        assert!(smaller.valid);

        let fresh = starting_region(None, 320, 240);
        assert_eq!(fresh, smaller);
    }

    #[test]
    fn test_roi_around_enlarges_and_clips() {
        let mut set = flat_set(0.5, 0.5);
        set.points_mut()[0] = Landmark::new(0.4, 0.4, 0.0);
        set.points_mut()[1] = Landmark::new(0.6, 0.6, 0.0);

        let roi = roi_around(&set, 100, 100).unwrap();
        assert_eq!((roi.x, roi.y, roi.width, roi.height), (35, 35, 30, 30));

        set.points_mut()[1] = Landmark::new(1.0, 1.0, 0.0);
        let clipped = roi_around(&set, 100, 100).unwrap();
        assert_eq!(clipped.x + clipped.width, 100);
    }

    #[test]
    fn test_roi_around_degenerate_landmarks() {
        assert!(roi_around(&flat_set(0.5, 0.5), 100, 100).is_none());
    }

    #[test]
    fn test_decode_mesh_maps_into_frame() {
        let roi = FaceRegion::clipped(100, 50, 96, 96, 0.0, 400, 200);
        let mut coords = vec![0.0; LANDMARK_COUNT * 3];
        coords[0] = 96.0; // x of point 0, half the input
        coords[1] = 192.0; // y of point 0, full input
        let outputs = vec![coords, vec![5.0]];

        let set = decode_mesh(&outputs, &roi, 400, 200, 0.5).unwrap();
        let first = set.get(0).unwrap();
        assert!((first.x - (100.0 + 48.0) / 400.0).abs() < 1e-6);
        assert!((first.y - (50.0 + 96.0) / 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_mesh_respects_presence() {
        let roi = centered_square(192, 192);
        let outputs = vec![vec![0.0; LANDMARK_COUNT * 3], vec![-5.0]];
        assert!(decode_mesh(&outputs, &roi, 192, 192, 0.5).is_none());
        assert!(decode_mesh(&outputs[..1], &roi, 192, 192, 0.5).is_some());
        assert!(decode_mesh(&[vec![1.0]], &roi, 192, 192, 0.5).is_none());
    }

    #[test]
    fn test_missing_model_path_is_config_error() {
        assert!(matches!(
            FaceMeshTracker::new(&DmsConfig::default()),
            Err(DmsError::Config(_))
        ));
    }
}
