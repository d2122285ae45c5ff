use super::overlay::OverlayPainter;
use super::sink::VideoSink;
use crate::config::FusionConfig;
use crate::distributor::{Attachment, FrameConsumer, VideoInput};
use crate::error::{PublishError, Result};
use crate::frame::Frame;
use crate::stage::{ErrorThrottle, FallSnapshot, ObjectSnapshot, Snapshottable, ToddlerSnapshot};
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, trace};

pub const FUSION_NAME: &str = "fusion_publisher";

/// One fused frame as served to still-image readers
#[derive(Debug, Clone)]
pub struct FusedFrame {
    pub seq: u64,
    pub pts: Duration,
    pub timestamp: SystemTime,
    pub jpeg: Bytes,
}

/// The stages whose snapshots get drawn
pub struct FusionInputs {
    pub objects: Arc<dyn Snapshottable<Snapshot = ObjectSnapshot>>,
    pub toddler: Option<Arc<dyn Snapshottable<Snapshot = ToddlerSnapshot>>>,
    pub fall: Option<Arc<dyn Snapshottable<Snapshot = FallSnapshot>>>,
}

impl FusionInputs {
    pub fn new(objects: Arc<dyn Snapshottable<Snapshot = ObjectSnapshot>>) -> Self {
        Self {
            objects,
            toddler: None,
            fall: None,
        }
    }

    pub fn with_toddler(
        mut self,
        toddler: Arc<dyn Snapshottable<Snapshot = ToddlerSnapshot>>,
    ) -> Self {
        self.toddler = Some(toddler);
        self
    }

    pub fn with_fall(mut self, fall: Arc<dyn Snapshottable<Snapshot = FallSnapshot>>) -> Self {
        self.fall = Some(fall);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FusionStats {
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub failures: u64,
}

/// Encode an RGB image as JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> std::result::Result<Bytes, PublishError> {
    let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|e| PublishError::Encode {
            details: e.to_string(),
        })?;
    Ok(Bytes::from(buffer))
}

/// Final consumer that draws every stage's latest results onto the live
/// frame, pushes it to the outbound track and keeps a JPEG of it for
/// still-image readers
///
/// Both outputs are written from the same annotated frame before the next
/// frame is admitted, so they never disagree.
pub struct FusionPublisher {
    inputs: FusionInputs,
    painter: Arc<OverlayPainter>,
    jpeg_quality: u8,
    fps: f64,
    sink: Arc<dyn VideoSink>,
    latest: watch::Sender<Option<Arc<FusedFrame>>>,
    busy: Mutex<()>,
    attachment: Mutex<Option<Attachment>>,
    error_throttle: ErrorThrottle,
    frames_published: AtomicU64,
    frames_dropped: AtomicU64,
    failures: AtomicU64,
}

impl FusionPublisher {
    pub fn new(config: &FusionConfig, inputs: FusionInputs, sink: Arc<dyn VideoSink>) -> Self {
        Self::with_painter(config, inputs, sink, OverlayPainter::from_config(config))
    }

    pub fn with_painter(
        config: &FusionConfig,
        inputs: FusionInputs,
        sink: Arc<dyn VideoSink>,
        painter: OverlayPainter,
    ) -> Self {
        info!(
            "Creating fusion publisher at {:.1} fps (toddler: {}, fall: {})",
            config.fps,
            inputs.toddler.is_some(),
            inputs.fall.is_some()
        );

        let (latest, _) = watch::channel(None);

        Self {
            inputs,
            painter: Arc::new(painter),
            jpeg_quality: config.jpeg_quality,
            fps: config.fps,
            sink,
            latest,
            busy: Mutex::new(()),
            attachment: Mutex::new(None),
            error_throttle: ErrorThrottle::default(),
            frames_published: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn latest_frame(&self) -> Option<Arc<FusedFrame>> {
        self.latest.borrow().clone()
    }

    /// Most recent fused JPEG, if any frame has been published yet
    pub fn latest_jpeg(&self) -> Option<Bytes> {
        self.latest_frame().map(|frame| frame.jpeg.clone())
    }

    pub fn has_frame(&self) -> bool {
        self.latest.borrow().is_some()
    }

    /// Watch fused frames as they are published
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<FusedFrame>>> {
        self.latest.subscribe()
    }

    /// Wait up to `timeout` for the first fused frame
    pub async fn wait_for_frame(&self, timeout: Duration) -> Option<Arc<FusedFrame>> {
        let mut receiver = self.latest.subscribe();
        let waited = tokio::time::timeout(timeout, async move {
            match receiver.wait_for(Option::is_some).await {
                Ok(frame) => (*frame).clone(),
                Err(_) => None,
            }
        })
        .await;

        waited.ok().flatten()
    }

    /// Attach to a video input, detaching from any previous one first
    pub async fn process_video(self: &Arc<Self>, input: VideoInput) -> Result<()> {
        let mut attachment = self.attachment.lock().await;
        if let Some(previous) = attachment.take() {
            info!("Fusion publisher switching video input");
            previous.detach().await;
        }

        let consumer: Arc<dyn FrameConsumer> = Arc::clone(self) as Arc<dyn FrameConsumer>;
        *attachment = Some(Attachment::attach(input, consumer, self.fps, FUSION_NAME)?);
        Ok(())
    }

    pub async fn stop(&self) {
        let previous = self.attachment.lock().await.take();
        if let Some(attachment) = previous {
            info!("Stopping fusion publisher");
            attachment.detach().await;
        }
    }

    pub fn stats(&self) -> FusionStats {
        FusionStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn record_failure(&self, seq: u64, e: &dyn std::fmt::Display) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Some(suppressed) = self.error_throttle.check() {
            error!(
                "Fusion failed on frame {}: {} ({} similar errors suppressed)",
                seq, e, suppressed
            );
        }
    }
}

#[async_trait]
impl FrameConsumer for FusionPublisher {
    async fn on_frame(&self, frame: Frame) {
        let Ok(_busy) = self.busy.try_lock() else {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Fusion busy, dropping frame {}", frame.seq);
            return;
        };

        let seq = frame.seq;
        let objects = self.inputs.objects.snapshot();
        let toddler = self.inputs.toddler.as_ref().map(|t| t.snapshot());
        let fall = self.inputs.fall.as_ref().map(|f| f.snapshot());
        let painter = Arc::clone(&self.painter);
        let quality = self.jpeg_quality;

        let rendered = tokio::task::spawn_blocking(move || {
            let mut image = frame.to_owned_image();
            painter.annotate(&mut image, &objects, toddler.as_deref(), fall.as_deref());
            let jpeg = encode_jpeg(&image, quality)?;
            Ok::<_, PublishError>((frame.with_image(image), jpeg))
        })
        .await;

        let (annotated, jpeg) = match rendered {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return self.record_failure(seq, &e),
            Err(e) => return self.record_failure(seq, &e),
        };

        let fused = Arc::new(FusedFrame {
            seq: annotated.seq,
            pts: annotated.pts,
            timestamp: annotated.timestamp,
            jpeg,
        });

        if let Err(e) = self.sink.push(annotated).await {
            return self.record_failure(seq, &e);
        }
        self.latest.send_replace(Some(fused));
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        debug!("Published fused frame {}", seq);
    }
}
