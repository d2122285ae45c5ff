//! Rate-limited detection stages.
//!
//! Every stage is a [`DetectionStage`] parameterized by a [`StageInference`]:
//! the generic part handles the at-most-one-in-flight discipline, snapshot
//! publication and event emission, the inference part wraps one model.

mod fall;
mod object;
mod runner;
mod snapshot;
mod throttle;
mod toddler;

#[cfg(test)]
mod tests;

pub use fall::{is_falling, FallInference, FallSnapshot, FALL_STAGE_NAME};
pub use object::{ObjectInference, ObjectSnapshot, OBJECT_STAGE_NAME};
pub use runner::{DetectionStage, StageInference, StageStats};
pub use snapshot::{SnapshotCell, Snapshottable};
pub use throttle::{ErrorThrottle, DEFAULT_ERROR_LOG_INTERVAL};
pub use toddler::{
    resolve_api_key, ModelRef, ToddlerInference, ToddlerSnapshot, API_KEY_ENV,
    TODDLER_STAGE_NAME,
};

pub type ObjectStage = DetectionStage<ObjectInference>;
pub type FallStage = DetectionStage<FallInference>;
pub type ToddlerStage = DetectionStage<ToddlerInference>;
