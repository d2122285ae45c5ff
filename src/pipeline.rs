//! Composition of the whole watch pipeline.
//!
//! One shared distributor fans the video source out to the detection stages
//! and the fusion publisher; the cry monitor runs beside it on the audio
//! track. Every stage is handed to fusion as a [`Snapshottable`], so a
//! missing capability is a compile error rather than a per-frame check.

use crate::audio::{AudioChunk, CryMonitor, CryMonitorStats};
use crate::backend::{
    AudioClassifier, IdleBackend, ObjectDetector, PoseDetector, ToddlerClassifier,
};
use crate::config::CribwatchConfig;
use crate::distributor::{DistributorStats, FrameDistributor, FrameSource, VideoInput};
use crate::error::{BackendError, DistributorError, Result};
use crate::events::EventBus;
use crate::fusion::{FusionInputs, FusionPublisher, FusionStats, QueuedVideoSink, VideoSink};
use crate::stage::{
    FallInference, FallSnapshot, FallStage, ModelRef, ObjectInference, ObjectSnapshot,
    ObjectStage, Snapshottable, StageStats, ToddlerInference, ToddlerSnapshot, ToddlerStage,
};
use crate::status::StatusSurface;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const DISTRIBUTOR_NAME: &str = "video_source";

/// Opens the remote toddler classifier for a model with an API key
pub type ToddlerConnector = Box<
    dyn FnOnce(&ModelRef, &str) -> std::result::Result<Arc<dyn ToddlerClassifier>, BackendError>
        + Send,
>;

pub enum ToddlerBackend {
    /// Connect at construction; needs an API key from config or environment
    Remote(ToddlerConnector),
    /// Already-connected classifier, no credential lookup
    Ready(Arc<dyn ToddlerClassifier>),
}

/// Inference backends the pipeline is built on
pub struct Backends {
    pub object: Arc<dyn ObjectDetector>,
    pub pose: Arc<dyn PoseDetector>,
    pub toddler: ToddlerBackend,
    pub audio: std::result::Result<Arc<dyn AudioClassifier>, BackendError>,
}

impl Backends {
    /// Backends that never detect anything, with no audio model
    pub fn idle() -> Self {
        Self {
            object: Arc::new(IdleBackend),
            pose: Arc::new(IdleBackend),
            toddler: ToddlerBackend::Ready(Arc::new(IdleBackend)),
            audio: Err(BackendError::unavailable("no audio model configured")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub distributor: DistributorStats,
    pub stages: Vec<StageStats>,
    pub fusion: FusionStats,
    pub audio: CryMonitorStats,
}

pub struct WatchPipeline {
    distributor: Arc<FrameDistributor>,
    event_bus: Arc<EventBus>,
    object_stage: Arc<ObjectStage>,
    fall_stage: Arc<FallStage>,
    toddler_stage: Option<Arc<ToddlerStage>>,
    publisher: Arc<FusionPublisher>,
    sink: Arc<QueuedVideoSink>,
    cry_monitor: Arc<CryMonitor>,
    status: StatusSurface,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl WatchPipeline {
    /// Build every component; fails only when the toddler stage cannot be constructed
    pub fn new(config: &CribwatchConfig, backends: Backends) -> Result<Self> {
        info!("Building watch pipeline");

        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let distributor = Arc::new(FrameDistributor::new(
            DISTRIBUTOR_NAME,
            config.source.buffer_capacity,
        ));

        let object_stage = Arc::new(
            ObjectStage::new(
                ObjectInference::new(backends.object, &config.object),
                config.object.fps,
            )
            .with_event_bus(Arc::clone(&event_bus)),
        );

        let fall_stage = Arc::new(
            FallStage::new(
                FallInference::new(backends.pose, &config.fall),
                config.fall.fps,
            )
            .with_event_bus(Arc::clone(&event_bus)),
        );

        let toddler_stage = if config.toddler.enabled {
            let inference = match backends.toddler {
                ToddlerBackend::Remote(connect) => {
                    ToddlerInference::connect(&config.toddler, connect)?
                }
                ToddlerBackend::Ready(classifier) => ToddlerInference::new(
                    classifier,
                    ModelRef::parse(&config.toddler.model_id)?,
                    &config.toddler,
                ),
            };
            Some(Arc::new(
                ToddlerStage::new(inference, config.toddler.fps.max(1.0))
                    .with_event_bus(Arc::clone(&event_bus))
                    .with_error_throttle(config.toddler.error_log_throttle()),
            ))
        } else {
            info!("Toddler stage disabled by configuration");
            None
        };

        let mut inputs = FusionInputs::new(
            Arc::clone(&object_stage) as Arc<dyn Snapshottable<Snapshot = ObjectSnapshot>>
        )
        .with_fall(Arc::clone(&fall_stage) as Arc<dyn Snapshottable<Snapshot = FallSnapshot>>);
        if let Some(toddler) = &toddler_stage {
            inputs = inputs.with_toddler(
                Arc::clone(toddler) as Arc<dyn Snapshottable<Snapshot = ToddlerSnapshot>>
            );
        }

        let sink = Arc::new(QueuedVideoSink::new(
            config.fusion.sink_capacity,
            config.fusion.output_resolution,
            config.fusion.fps,
        ));
        let publisher = Arc::new(FusionPublisher::new(
            &config.fusion,
            inputs,
            Arc::clone(&sink) as Arc<dyn VideoSink>,
        ));

        let cry_monitor = Arc::new(CryMonitor::new(
            &config.audio,
            backends.audio,
            Some(Arc::clone(&event_bus)),
        ));

        let status = StatusSurface::new(config.status.first_frame_timeout())
            .with_publisher(Arc::clone(&publisher))
            .with_cry_monitor(Arc::clone(&cry_monitor));

        Ok(Self {
            distributor,
            event_bus,
            object_stage,
            fall_stage,
            toddler_stage,
            publisher,
            sink,
            cry_monitor,
            status,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Attach every consumer to the shared distributor and start reading `source`
    pub async fn start(&self, source: Box<dyn FrameSource>) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            let name = self.distributor.name().to_string();
            return Err(if self.stopped.load(Ordering::Acquire) {
                DistributorError::Stopped { name }.into()
            } else {
                DistributorError::AlreadyRunning { name }.into()
            });
        }

        let shared = || VideoInput::Shared(Arc::clone(&self.distributor));
        self.object_stage.process_video(shared()).await?;
        self.fall_stage.process_video(shared()).await?;
        if let Some(toddler) = &self.toddler_stage {
            toddler.process_video(shared()).await?;
        }
        self.publisher.process_video(shared()).await?;

        self.distributor.start(source)?;
        info!(
            "Watch pipeline started with {} consumers",
            self.distributor.consumer_count()
        );
        Ok(())
    }

    /// Detach everything and release the source; safe to call more than once
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stopping watch pipeline");

        self.object_stage.stop().await;
        self.fall_stage.stop().await;
        if let Some(toddler) = &self.toddler_stage {
            toddler.stop().await;
        }
        self.publisher.stop().await;
        self.distributor.stop().await;
        self.sink.close();
        self.cry_monitor.stop().await;

        info!("Watch pipeline stopped");
    }

    /// Hand one chunk of the live audio track to the cry monitor
    pub fn ingest_audio(&self, chunk: AudioChunk) -> bool {
        self.cry_monitor.ingest(chunk)
    }

    pub fn status(&self) -> StatusSurface {
        self.status.clone()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn distributor(&self) -> &Arc<FrameDistributor> {
        &self.distributor
    }

    /// The outbound video track
    pub fn sink(&self) -> &Arc<QueuedVideoSink> {
        &self.sink
    }

    pub fn publisher(&self) -> &Arc<FusionPublisher> {
        &self.publisher
    }

    pub fn object_stage(&self) -> &Arc<ObjectStage> {
        &self.object_stage
    }

    pub fn fall_stage(&self) -> &Arc<FallStage> {
        &self.fall_stage
    }

    pub fn toddler_stage(&self) -> Option<&Arc<ToddlerStage>> {
        self.toddler_stage.as_ref()
    }

    pub fn cry_monitor(&self) -> &Arc<CryMonitor> {
        &self.cry_monitor
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stages = vec![self.object_stage.stats(), self.fall_stage.stats()];
        if let Some(toddler) = &self.toddler_stage {
            stages.push(toddler.stats());
        }

        PipelineStats {
            distributor: self.distributor.stats(),
            stages,
            fusion: self.publisher.stats(),
            audio: self.cry_monitor.stats(),
        }
    }
}

impl Drop for WatchPipeline {
    fn drop(&mut self) {
        if self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire) {
            warn!("Watch pipeline dropped without stop()");
        }
    }
}
