//! Inference capabilities the stages are built on.
//!
//! The models themselves live outside this crate. Every call here is
//! blocking; stages run them on blocking worker threads so the dispatch
//! loop never waits on a model.

use crate::detection::{BoundingBox, Detection, Keypoint};
use crate::error::BackendError;
use image::RgbImage;

/// One box as reported by a detector, before validation
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: Option<u32>,
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Pose landmarks in COCO order (empty for plain detectors)
    pub keypoints: Vec<Keypoint>,
}

impl RawDetection {
    pub fn new<S: Into<String>>(label: S, confidence: f32, corners: [f32; 4]) -> Self {
        Self {
            class_id: None,
            label: label.into(),
            confidence,
            x1: corners[0],
            y1: corners[1],
            x2: corners[2],
            y2: corners[3],
            keypoints: Vec::new(),
        }
    }

    pub fn with_class_id(mut self, class_id: u32) -> Self {
        self.class_id = Some(class_id);
        self
    }

    pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
        self.keypoints = keypoints;
        self
    }

    /// Validated detection, or `None` when the box is degenerate
    pub fn to_detection(&self) -> Option<Detection> {
        let bbox = BoundingBox::from_corners(self.x1, self.y1, self.x2, self.y2)?;
        let detection = Detection::new(self.label.clone(), self.confidence, bbox);
        Some(match self.class_id {
            Some(class_id) => detection.with_class_id(class_id),
            None => detection,
        })
    }
}

/// General object detector (boxes, classes, scores)
pub trait ObjectDetector: Send + Sync {
    fn detect(
        &self,
        image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>, BackendError>;
}

/// Person detector that also reports pose keypoints per box
pub trait PoseDetector: Send + Sync {
    fn detect_poses(
        &self,
        image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>, BackendError>;
}

/// Remote toddler/adult classifier
///
/// Returns the service's JSON body, expected to look like
/// `{"predictions": [{"class", "confidence", "x", "y", "width", "height"}]}`
/// with center-based boxes. `confidence` and `overlap` are percentages.
pub trait ToddlerClassifier: Send + Sync {
    fn predict(
        &self,
        image: &RgbImage,
        confidence: u32,
        overlap: u32,
    ) -> Result<serde_json::Value, BackendError>;
}

/// Audio event classifier over 16 kHz mono waveforms
pub trait AudioClassifier: Send + Sync {
    /// Class-name table, fetched once when the monitor is built
    fn class_names(&self) -> Result<Vec<String>, BackendError>;

    /// Per-class scores for one waveform, indexed like [`class_names`](Self::class_names)
    fn infer(&self, waveform: &[f32]) -> Result<Vec<f32>, BackendError>;
}

/// Backends that never see anything; used for dry runs without models
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleBackend;

impl ObjectDetector for IdleBackend {
    fn detect(
        &self,
        _image: &RgbImage,
        _threshold: f32,
    ) -> Result<Vec<RawDetection>, BackendError> {
        Ok(Vec::new())
    }
}

impl PoseDetector for IdleBackend {
    fn detect_poses(
        &self,
        _image: &RgbImage,
        _threshold: f32,
    ) -> Result<Vec<RawDetection>, BackendError> {
        Ok(Vec::new())
    }
}

impl ToddlerClassifier for IdleBackend {
    fn predict(
        &self,
        _image: &RgbImage,
        _confidence: u32,
        _overlap: u32,
    ) -> Result<serde_json::Value, BackendError> {
        Ok(serde_json::json!({ "predictions": [] }))
    }
}
