use super::runner::StageInference;
use crate::backend::ObjectDetector;
use crate::config::ObjectStageConfig;
use crate::detection::Detection;
use crate::error::BackendError;
use crate::events::VisionEvent;
use crate::frame::Frame;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

pub const OBJECT_STAGE_NAME: &str = "object_detection";

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectSnapshot {
    /// Stage frame number the detections came from; `None` before the first inference
    pub frame_number: Option<u64>,
    #[serde(skip)]
    pub timestamp: Option<SystemTime>,
    pub detections: Vec<Detection>,
}

/// General object detection with a label blocklist
pub struct ObjectInference {
    detector: Arc<dyn ObjectDetector>,
    confidence_threshold: f32,
    excluded_labels: HashSet<String>,
}

impl ObjectInference {
    pub fn new(detector: Arc<dyn ObjectDetector>, config: &ObjectStageConfig) -> Self {
        Self {
            detector,
            confidence_threshold: config.confidence_threshold,
            excluded_labels: config
                .excluded_labels
                .iter()
                .map(|label| label.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn is_excluded(&self, label: &str) -> bool {
        self.excluded_labels.contains(&label.trim().to_lowercase())
    }
}

impl StageInference for ObjectInference {
    type Snapshot = ObjectSnapshot;

    fn name(&self) -> &str {
        OBJECT_STAGE_NAME
    }

    fn infer(&self, frame_number: u64, frame: &Frame) -> Result<ObjectSnapshot, BackendError> {
        let raw = self.detector.detect(&frame.image, self.confidence_threshold)?;

        let detections = raw
            .iter()
            .filter(|r| r.confidence >= self.confidence_threshold)
            .filter(|r| !self.is_excluded(&r.label))
            .filter_map(|r| r.to_detection())
            .collect();

        Ok(ObjectSnapshot {
            frame_number: Some(frame_number),
            timestamp: Some(frame.timestamp),
            detections,
        })
    }

    fn event(&self, snapshot: &ObjectSnapshot) -> Option<VisionEvent> {
        if snapshot.detections.is_empty() {
            return None;
        }

        Some(VisionEvent::ObjectDetected {
            frame_number: snapshot.frame_number?,
            timestamp: snapshot.timestamp?,
            objects: snapshot.detections.clone(),
        })
    }
}
