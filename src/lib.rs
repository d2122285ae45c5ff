pub mod audio;
pub mod backend;
pub mod config;
pub mod detection;
pub mod distributor;
pub mod error;
pub mod events;
pub mod frame;
pub mod fusion;
pub mod pipeline;
pub mod stage;
pub mod status;

pub use audio::{AudioChunk, CryMonitor, CryMonitorStats, CryState, CryTracker};
pub use backend::{
    AudioClassifier, IdleBackend, ObjectDetector, PoseDetector, RawDetection, ToddlerClassifier,
};
pub use config::CribwatchConfig;
pub use detection::{BoundingBox, Detection, Keypoint, PoseInfo, PoseKeypoint};
pub use distributor::{
    frame_channel, Attachment, ChannelSource, FrameConsumer, FrameDistributor, FrameSource,
    TestPatternSource, VideoInput,
};
pub use error::{
    BackendError, CribwatchError, DistributorError, EventBusError, PublishError, Result,
    StageError,
};
pub use events::{EventBus, EventFilter, EventReceiver, VisionEvent};
pub use frame::Frame;
pub use fusion::{FusedFrame, FusionPublisher, QueuedVideoSink, VideoSink};
pub use pipeline::{Backends, PipelineStats, ToddlerBackend, ToddlerConnector, WatchPipeline};
pub use stage::{
    DetectionStage, FallSnapshot, FallStage, ObjectSnapshot, ObjectStage, Snapshottable,
    StageInference, ToddlerSnapshot, ToddlerStage,
};
pub use status::{mjpeg_part, CryStatus, StatusSurface, VideoStatus};
