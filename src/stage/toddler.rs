use super::runner::StageInference;
use crate::backend::ToddlerClassifier;
use crate::config::ToddlerStageConfig;
use crate::detection::{BoundingBox, Detection};
use crate::error::{BackendError, StageError};
use crate::events::VisionEvent;
use crate::frame::Frame;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

pub const TODDLER_STAGE_NAME: &str = "toddler_detection";

pub const API_KEY_ENV: &str = "ROBOFLOW_API_KEY";

const TODDLER_CLASS: &str = "toddler";
const ALLOWED_CLASSES: [&str; 2] = [TODDLER_CLASS, "adult"];
const UNKNOWN_CLASS: &str = "Unknown";

/// A remote model reference of the form `<project>/<version>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub project: String,
    pub version: u32,
}

impl ModelRef {
    pub fn parse(model_id: &str) -> Result<Self, StageError> {
        let invalid = |details: &str| StageError::Construction {
            stage: TODDLER_STAGE_NAME.to_string(),
            details: format!("model_id '{}' {}", model_id, details),
        };

        let (project, version) = model_id
            .rsplit_once('/')
            .ok_or_else(|| invalid("must be in '<project>/<version>' format"))?;
        if project.is_empty() {
            return Err(invalid("has an empty project name"));
        }
        let version = version
            .parse::<u32>()
            .map_err(|_| invalid("version must be an integer"))?;

        Ok(Self {
            project: project.to_string(),
            version,
        })
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.version)
    }
}

/// Pick the configured API key, else the environment's; blanks count as missing
pub fn resolve_api_key(configured: Option<&str>, from_env: Option<String>) -> Option<String> {
    configured
        .map(str::to_string)
        .or(from_env)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToddlerSnapshot {
    pub frame_number: Option<u64>,
    #[serde(skip)]
    pub timestamp: Option<SystemTime>,
    pub toddler_present: bool,
    pub detections: Vec<Detection>,
}

/// Toddler/adult presence via a remote classifier
pub struct ToddlerInference {
    classifier: Arc<dyn ToddlerClassifier>,
    model: ModelRef,
    confidence_threshold: f32,
    toddler_min_confidence: f32,
    request_confidence: u32,
    request_overlap: u32,
}

impl ToddlerInference {
    /// Resolve credentials and connect to the remote model
    ///
    /// Fails when no API key is configured or the connection is refused;
    /// the caller treats that as a configuration error.
    pub fn connect<F>(config: &ToddlerStageConfig, connect: F) -> Result<Self, StageError>
    where
        F: FnOnce(&ModelRef, &str) -> Result<Arc<dyn ToddlerClassifier>, BackendError>,
    {
        let model = ModelRef::parse(&config.model_id)?;
        let api_key = resolve_api_key(config.api_key.as_deref(), std::env::var(API_KEY_ENV).ok())
            .ok_or_else(|| StageError::Construction {
                stage: TODDLER_STAGE_NAME.to_string(),
                details: format!("{} is required", API_KEY_ENV),
            })?;

        let classifier = connect(&model, &api_key).map_err(|e| StageError::Construction {
            stage: TODDLER_STAGE_NAME.to_string(),
            details: e.to_string(),
        })?;

        info!("Connected toddler classifier {}", model);
        Ok(Self::new(classifier, model, config))
    }

    pub fn new(
        classifier: Arc<dyn ToddlerClassifier>,
        model: ModelRef,
        config: &ToddlerStageConfig,
    ) -> Self {
        Self {
            classifier,
            model,
            confidence_threshold: config.confidence_threshold,
            toddler_min_confidence: config.toddler_min_confidence,
            request_confidence: ((config.confidence_threshold * 100.0) as u32).max(1),
            request_overlap: config.overlap,
        }
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    /// Confidence percentage sent with each request
    pub fn request_confidence(&self) -> u32 {
        self.request_confidence
    }

    /// Keep allow-listed predictions above their class floor
    pub fn filter_predictions(&self, response: &Value) -> Vec<Detection> {
        let Some(predictions) = response.get("predictions").and_then(Value::as_array) else {
            return Vec::new();
        };

        predictions
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|prediction| self.to_detection(prediction))
            .collect()
    }

    fn to_detection(&self, prediction: &Map<String, Value>) -> Option<Detection> {
        let class_name = class_name(prediction.get("class"));
        let class_lower = class_name.to_lowercase();
        if !ALLOWED_CLASSES.contains(&class_lower.as_str()) {
            return None;
        }

        let min_confidence = if class_lower == TODDLER_CLASS {
            self.confidence_threshold.max(self.toddler_min_confidence)
        } else {
            self.confidence_threshold
        };
        let confidence = number(prediction.get("confidence"))?;
        if confidence < f64::from(min_confidence) {
            return None;
        }

        let bbox = BoundingBox::from_center(
            number(prediction.get("x"))?,
            number(prediction.get("y"))?,
            number(prediction.get("width"))?,
            number(prediction.get("height"))?,
        )?;

        Some(Detection::new(class_name, confidence as f32, bbox))
    }
}

fn class_name(value: Option<&Value>) -> String {
    let name = match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string().trim().to_string(),
    };
    if name.is_empty() {
        UNKNOWN_CLASS.to_string()
    } else {
        name
    }
}

/// Numbers may arrive as JSON numbers or numeric strings
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_toddler(detection: &Detection) -> bool {
    detection.label.eq_ignore_ascii_case(TODDLER_CLASS)
}

impl StageInference for ToddlerInference {
    type Snapshot = ToddlerSnapshot;

    fn name(&self) -> &str {
        TODDLER_STAGE_NAME
    }

    fn infer(&self, frame_number: u64, frame: &Frame) -> Result<ToddlerSnapshot, BackendError> {
        let response =
            self.classifier
                .predict(&frame.image, self.request_confidence, self.request_overlap)?;

        let detections = self.filter_predictions(&response);

        Ok(ToddlerSnapshot {
            frame_number: Some(frame_number),
            timestamp: Some(frame.timestamp),
            toddler_present: detections.iter().any(is_toddler),
            detections,
        })
    }

    fn event(&self, snapshot: &ToddlerSnapshot) -> Option<VisionEvent> {
        let toddler = snapshot
            .detections
            .iter()
            .filter(|d| is_toddler(d))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

        Some(VisionEvent::ToddlerDetected {
            frame_number: snapshot.frame_number?,
            timestamp: snapshot.timestamp?,
            confidence: toddler.confidence,
            bbox: toddler.bbox,
        })
    }
}
