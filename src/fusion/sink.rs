use crate::distributor::FrameQueue;
use crate::error::PublishError;
use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Outbound live video track
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Hand over one annotated frame; must not wait on the reader
    async fn push(&self, frame: Frame) -> Result<(), PublishError>;
}

/// In-memory video track with a bounded drop-oldest buffer
pub struct QueuedVideoSink {
    frames: FrameQueue,
    resolution: (u32, u32),
    fps: f64,
    closed: AtomicBool,
}

impl QueuedVideoSink {
    pub fn new(capacity: usize, resolution: (u32, u32), fps: f64) -> Self {
        info!(
            "Outbound video track {}x{} @ {:.0} fps (buffer {})",
            resolution.0, resolution.1, fps, capacity
        );

        Self {
            frames: FrameQueue::new(capacity),
            resolution,
            fps,
            closed: AtomicBool::new(false),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames.frames_dropped()
    }

    /// Next buffered frame, waiting for one if necessary; `None` once closed
    pub async fn recv(&self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.frames.pop() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.frames.wait().await;
        }
    }

    pub fn try_recv(&self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Stop accepting frames and wake any reader
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closing outbound video track");
            self.frames.clear();
            self.frames.wake();
        }
    }
}

#[async_trait]
impl VideoSink for QueuedVideoSink {
    async fn push(&self, frame: Frame) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::SinkClosed);
        }
        self.frames.push(frame);
        Ok(())
    }
}
