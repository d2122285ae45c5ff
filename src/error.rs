use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CribwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Distributor error: {0}")]
    Distributor(#[from] DistributorError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),
}

/// Errors raised while building or running a detection stage
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage} could not be constructed: {details}")]
    Construction { stage: String, details: String },

    #[error("{stage} inference failed: {details}")]
    Inference { stage: String, details: String },
}

/// Errors reported by inference backends
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("backend unavailable: {details}")]
    Unavailable { details: String },

    #[error("inference call failed: {details}")]
    Failed { details: String },

    #[error("backend returned malformed output: {details}")]
    InvalidOutput { details: String },
}

impl BackendError {
    pub fn unavailable<S: Into<String>>(details: S) -> Self {
        Self::Unavailable {
            details: details.into(),
        }
    }

    pub fn failed<S: Into<String>>(details: S) -> Self {
        Self::Failed {
            details: details.into(),
        }
    }
}

/// Errors from the fused output side
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("no fused frame available after waiting {waited:?}")]
    NotReady { waited: Duration },

    #[error("JPEG encoding failed: {details}")]
    Encode { details: String },

    #[error("output sink closed")]
    SinkClosed,

    #[error("video publisher not initialized")]
    NotInitialized,
}

#[derive(Error, Debug)]
pub enum DistributorError {
    #[error("distributor '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("distributor '{name}' has been stopped")]
    Stopped { name: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, CribwatchError>;
