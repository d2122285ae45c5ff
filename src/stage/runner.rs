use super::snapshot::{SnapshotCell, Snapshottable};
use super::throttle::ErrorThrottle;
use crate::distributor::{Attachment, FrameConsumer, VideoInput};
use crate::error::{BackendError, Result, StageError};
use crate::events::{EventBus, VisionEvent};
use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace};

/// The model-specific half of a detection stage
///
/// `infer` is blocking and runs on a blocking worker thread. It receives the
/// stage's own frame number and returns the complete snapshot to publish.
pub trait StageInference: Send + Sync + 'static {
    type Snapshot: Default + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn infer(
        &self,
        frame_number: u64,
        frame: &Frame,
    ) -> std::result::Result<Self::Snapshot, BackendError>;

    /// Event worth broadcasting for a freshly published snapshot, if any
    fn event(&self, snapshot: &Self::Snapshot) -> Option<VisionEvent>;
}

/// Counters kept by every detection stage
#[derive(Debug, Clone, Default)]
pub struct StageStats {
    pub name: String,
    pub frames_admitted: u64,
    pub frames_dropped: u64,
    pub inferences: u64,
    pub failures: u64,
}

/// A frame consumer that runs at most one inference at a time and publishes
/// the latest result as an atomically swapped snapshot
///
/// Frames that arrive while an inference is in flight are dropped, so a
/// stage never runs faster than its model can keep up with.
pub struct DetectionStage<I: StageInference> {
    inference: Arc<I>,
    fps: f64,
    snapshot: SnapshotCell<I::Snapshot>,
    busy: Mutex<()>,
    attachment: Mutex<Option<Attachment>>,
    event_bus: Option<Arc<EventBus>>,
    error_throttle: ErrorThrottle,
    next_frame_number: AtomicU64,
    frames_admitted: AtomicU64,
    frames_dropped: AtomicU64,
    inferences: AtomicU64,
    failures: AtomicU64,
}

impl<I: StageInference> DetectionStage<I> {
    pub fn new(inference: I, fps: f64) -> Self {
        debug!("Creating detection stage '{}' at {:.2} fps", inference.name(), fps);

        Self {
            inference: Arc::new(inference),
            fps,
            snapshot: SnapshotCell::default(),
            busy: Mutex::new(()),
            attachment: Mutex::new(None),
            event_bus: None,
            error_throttle: ErrorThrottle::default(),
            next_frame_number: AtomicU64::new(0),
            frames_admitted: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            inferences: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Minimum spacing between two inference-failure log lines
    pub fn with_error_throttle(mut self, interval: Duration) -> Self {
        self.error_throttle = ErrorThrottle::new(interval);
        self
    }

    pub fn name(&self) -> &str {
        self.inference.name()
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn inference(&self) -> &I {
        &self.inference
    }

    /// Attach to a video input, detaching from any previous one first
    pub async fn process_video(self: &Arc<Self>, input: VideoInput) -> Result<()> {
        let mut attachment = self.attachment.lock().await;
        if let Some(previous) = attachment.take() {
            info!("Stage '{}' switching video input", self.name());
            previous.detach().await;
        }

        let consumer: Arc<dyn FrameConsumer> = Arc::clone(self) as Arc<dyn FrameConsumer>;
        *attachment = Some(Attachment::attach(input, consumer, self.fps, self.name())?);
        Ok(())
    }

    /// Detach from the video input. An in-flight inference is left to finish.
    pub async fn stop(&self) {
        let previous = self.attachment.lock().await.take();
        match previous {
            Some(attachment) => {
                info!("Stopping stage '{}'", self.name());
                attachment.detach().await;
            }
            None => debug!("Stage '{}' not attached", self.name()),
        }
    }

    pub fn stats(&self) -> StageStats {
        StageStats {
            name: self.name().to_string(),
            frames_admitted: self.frames_admitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            inferences: self.inferences.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn record_failure(&self, frame_number: u64, details: String) {
        self.failures.fetch_add(1, Ordering::Relaxed);

        if let Some(suppressed) = self.error_throttle.check() {
            let failure = StageError::Inference {
                stage: self.name().to_string(),
                details,
            };
            error!(
                "{} on frame {} ({} similar errors suppressed)",
                failure, frame_number, suppressed
            );

            if let Some(bus) = &self.event_bus {
                let event = VisionEvent::StageError {
                    component: self.name().to_string(),
                    error: failure.to_string(),
                };
                if let Err(e) = bus.publish(event) {
                    debug!("Stage '{}' error event not delivered: {}", self.name(), e);
                }
            }
        }
    }
}

#[async_trait]
impl<I: StageInference> FrameConsumer for DetectionStage<I> {
    async fn on_frame(&self, frame: Frame) {
        let Ok(_busy) = self.busy.try_lock() else {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Stage '{}' busy, dropping frame {}", self.name(), frame.seq);
            return;
        };

        let frame_number = self.next_frame_number.fetch_add(1, Ordering::Relaxed);
        self.frames_admitted.fetch_add(1, Ordering::Relaxed);

        let inference = Arc::clone(&self.inference);
        let outcome =
            tokio::task::spawn_blocking(move || inference.infer(frame_number, &frame)).await;

        let snapshot = match outcome {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return self.record_failure(frame_number, e.to_string()),
            Err(e) => {
                return self.record_failure(frame_number, format!("inference task aborted: {}", e))
            }
        };

        let event = self.inference.event(&snapshot);
        self.snapshot.store(snapshot);
        self.inferences.fetch_add(1, Ordering::Relaxed);
        trace!("Stage '{}' published frame {}", self.name(), frame_number);

        if let (Some(bus), Some(event)) = (&self.event_bus, event) {
            if let Err(e) = bus.publish(event) {
                debug!("Stage '{}' event not delivered: {}", self.name(), e);
            }
        }
    }
}

impl<I: StageInference> Snapshottable for DetectionStage<I> {
    type Snapshot = I::Snapshot;

    fn snapshot(&self) -> Arc<I::Snapshot> {
        self.snapshot.load()
    }
}
