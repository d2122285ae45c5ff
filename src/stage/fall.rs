use super::runner::StageInference;
use crate::backend::PoseDetector;
use crate::config::FallStageConfig;
use crate::detection::{BoundingBox, Detection, Keypoint, PoseInfo, PoseKeypoint};
use crate::error::BackendError;
use crate::events::VisionEvent;
use crate::frame::Frame;
use serde::Serialize;
use std::sync::Arc;

pub const FALL_STAGE_NAME: &str = "fall_detection";

const PERSON_LABEL: &str = "person";

/// Keypoints needed before the head/hip comparison is attempted
const MIN_POSE_KEYPOINTS: usize = PoseKeypoint::RightHip.index() + 1;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FallSnapshot {
    pub frame_number: Option<u64>,
    pub detections: Vec<Detection>,
    pub fall_present: bool,
    /// Most confident fall of the latest inference
    pub latest_event: Option<VisionEvent>,
}

impl FallSnapshot {
    /// Highest-confidence detection flagged as falling
    pub fn primary_fall(&self) -> Option<&Detection> {
        most_confident_fall(&self.detections)
    }
}

/// Pose-based fall heuristic
///
/// A person counts as fallen when the box is wider than tall by more than
/// `ratio_threshold`, or when the nose sits below the midpoint of the hips.
pub fn is_falling(bbox: &BoundingBox, keypoints: &[Keypoint], ratio_threshold: f32) -> bool {
    bbox.aspect_ratio() > ratio_threshold || head_below_hips(keypoints)
}

/// Image y grows downwards, so "below" means a larger y
fn head_below_hips(keypoints: &[Keypoint]) -> bool {
    if keypoints.len() < MIN_POSE_KEYPOINTS {
        return false;
    }

    let y_of = |point: PoseKeypoint| point.locate(keypoints).map(|k| k.y).unwrap_or(0.0);
    let nose_y = y_of(PoseKeypoint::Nose);
    let left_hip_y = y_of(PoseKeypoint::LeftHip);
    let right_hip_y = y_of(PoseKeypoint::RightHip);

    // undetected landmarks come back at 0
    if nose_y <= 0.0 || left_hip_y <= 0.0 || right_hip_y <= 0.0 {
        return false;
    }

    nose_y > (left_hip_y + right_hip_y) / 2.0
}

fn most_confident_fall(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.is_falling())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

pub struct FallInference {
    detector: Arc<dyn PoseDetector>,
    confidence_threshold: f32,
    fall_ratio_threshold: f32,
}

impl FallInference {
    pub fn new(detector: Arc<dyn PoseDetector>, config: &FallStageConfig) -> Self {
        Self {
            detector,
            confidence_threshold: config.confidence_threshold,
            fall_ratio_threshold: config.fall_ratio_threshold,
        }
    }
}

impl StageInference for FallInference {
    type Snapshot = FallSnapshot;

    fn name(&self) -> &str {
        FALL_STAGE_NAME
    }

    fn infer(&self, frame_number: u64, frame: &Frame) -> Result<FallSnapshot, BackendError> {
        let people = self
            .detector
            .detect_poses(&frame.image, self.confidence_threshold)?;

        let detections: Vec<Detection> = people
            .into_iter()
            .filter_map(|person| {
                let bbox =
                    BoundingBox::from_corners(person.x1, person.y1, person.x2, person.y2)?;
                let falling = is_falling(&bbox, &person.keypoints, self.fall_ratio_threshold);
                let detection = Detection::new(PERSON_LABEL, person.confidence, bbox).with_pose(
                    PoseInfo {
                        is_falling: falling,
                        keypoints: person.keypoints,
                    },
                );
                Some(match person.class_id {
                    Some(class_id) => detection.with_class_id(class_id),
                    None => detection,
                })
            })
            .collect();

        let latest_event = most_confident_fall(&detections).map(|fall| VisionEvent::FallDetected {
            frame_number,
            timestamp: frame.timestamp,
            confidence: fall.confidence,
            bbox: fall.bbox,
        });

        Ok(FallSnapshot {
            frame_number: Some(frame_number),
            fall_present: latest_event.is_some(),
            detections,
            latest_event,
        })
    }

    fn event(&self, snapshot: &FallSnapshot) -> Option<VisionEvent> {
        snapshot.latest_event.clone()
    }
}
