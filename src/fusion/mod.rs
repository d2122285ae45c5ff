//! Fusion of stage snapshots into one annotated output stream.

mod overlay;
mod publisher;
mod sink;


pub use overlay::{OverlayPainter, FALL_COLOR, OBJECT_COLOR, TODDLER_COLOR};
pub use publisher::{
    encode_jpeg, FusedFrame, FusionInputs, FusionPublisher, FusionStats, FUSION_NAME,
};
pub use sink::{QueuedVideoSink, VideoSink};
