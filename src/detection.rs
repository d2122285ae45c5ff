use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle given by its top-left and bottom-right corners
///
/// Always satisfies `x1 < x2` and `y1 < y2`; the constructors refuse
/// degenerate boxes so a published detection can never carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
        if x1 < x2 && y1 < y2 {
            Some(Self { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    /// Build a box from floating point corners, truncating towards zero
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return None;
        }
        Self::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32)
    }

    /// Build a box from a center point and a size
    ///
    /// Half-pixel edges round to the nearest even coordinate.
    pub fn from_center(cx: f64, cy: f64, width: f64, height: f64) -> Option<Self> {
        if !(width > 0.0 && height > 0.0) || !cx.is_finite() || !cy.is_finite() {
            return None;
        }
        Self::new(
            (cx - width / 2.0).round_ties_even() as i32,
            (cy - height / 2.0).round_ties_even() as i32,
            (cx + width / 2.0).round_ties_even() as i32,
            (cy + height / 2.0).round_ties_even() as i32,
        )
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Width over height
    pub fn aspect_ratio(&self) -> f32 {
        self.width().max(1) as f32 / self.height().max(1) as f32
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }
}

/// A single pose landmark in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, score: None }
    }

    pub fn with_score(x: f32, y: f32, score: f32) -> Self {
        Self {
            x,
            y,
            score: Some(score),
        }
    }
}

/// Landmark order of the 17-point COCO pose layout used by the pose detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseKeypoint {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl PoseKeypoint {
    pub const COUNT: usize = 17;

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Look this landmark up in a keypoint list ordered by the COCO layout
    pub fn locate(self, keypoints: &[Keypoint]) -> Option<&Keypoint> {
        keypoints.get(self.index())
    }
}

/// Pose-specific part of a detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseInfo {
    pub is_falling: bool,
    pub keypoints: Vec<Keypoint>,
}

/// A labelled, scored box published by a detection stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<PoseInfo>,
}

impl Detection {
    pub fn new<S: Into<String>>(label: S, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            class_id: None,
            pose: None,
        }
    }

    pub fn with_class_id(mut self, class_id: u32) -> Self {
        self.class_id = Some(class_id);
        self
    }

    pub fn with_pose(mut self, pose: PoseInfo) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn is_falling(&self) -> bool {
        self.pose.as_ref().map(|p| p.is_falling).unwrap_or(false)
    }

    /// Overlay caption, e.g. `cup 0.87`
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.label, self.confidence)
    }
}
