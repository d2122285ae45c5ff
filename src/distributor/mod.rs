mod attach;
mod consumer;
mod dispatch;
mod queue;
mod source;
#[cfg(test)]
mod tests;

pub use attach::{Attachment, VideoInput, OWNED_BUFFER_CAPACITY};
pub use consumer::{ConsumerId, ConsumerStats, FrameConsumer};
pub use dispatch::{DistributorStats, FrameDistributor};
pub use queue::FrameQueue;
pub use source::{frame_channel, ChannelSource, FrameSource, TestPatternSource};
