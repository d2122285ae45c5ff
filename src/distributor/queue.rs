use crate::frame::Frame;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::trace;

/// Bounded single-producer/single-consumer frame queue with drop-oldest overflow
///
/// The producer never waits: when the queue is full the longest-queued frame
/// is evicted to make room for the new one.
pub struct FrameQueue {
    frames: ArrayQueue<Frame>,
    notify: Notify,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame, returning the evicted frame if the queue was full
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let evicted = self.frames.force_push(frame);
        self.pushed.fetch_add(1, Ordering::Relaxed);

        if let Some(old) = evicted.as_ref() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Frame queue full, dropped oldest frame {}", old.seq);
        }

        self.notify.notify_one();
        evicted
    }

    pub fn pop(&self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Wait until a frame has been pushed since the last wake-up
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Wake a pending `wait` without pushing a frame
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.frames.capacity()
    }

    pub fn clear(&self) {
        while self.frames.pop().is_some() {}
    }

    pub fn frames_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
