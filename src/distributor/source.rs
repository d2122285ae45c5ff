use crate::frame::Frame;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// A live video source feeding a distributor
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next decoded frame; `None` once the source has ended
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Release the underlying subscription. Called exactly once by the
    /// distributor when it stops reading from this source.
    async fn close(&mut self) {}
}

/// Source fed by an external decoder through a channel
pub struct ChannelSource {
    receiver: mpsc::Receiver<Frame>,
}

/// Create a channel-backed source and the sender the decoder pushes into
pub fn frame_channel(capacity: usize) -> (mpsc::Sender<Frame>, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (sender, ChannelSource { receiver })
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    async fn close(&mut self) {
        debug!("Closing channel frame source");
        self.receiver.close();
    }
}

/// Synthetic moving-gradient source paced at a fixed frame rate
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    ticker: Interval,
    seq: u64,
    limit: Option<u64>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        let frame_interval = Duration::from_secs_f64(1.0 / fps.max(0.1));
        let mut ticker = interval(frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Test pattern source {}x{} @ {:.1} fps",
            width, height, fps
        );

        Self {
            width,
            height,
            frame_interval,
            ticker,
            seq: 0,
            limit: None,
        }
    }

    /// Stop after producing `frames` frames
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    fn render(&self) -> RgbImage {
        let shift = (self.seq * 4) as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                (y % 256) as u8,
                ((x + y + shift) % 256) as u8,
            ])
        })
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        if self.limit.is_some_and(|limit| self.seq >= limit) {
            return None;
        }

        self.ticker.tick().await;

        let pts = self.frame_interval * self.seq as u32;
        let frame = Frame::new(self.seq, pts, SystemTime::now(), self.render());
        self.seq += 1;
        Some(frame)
    }
}
