use super::chunk::{resample_linear, AudioChunk};
use super::tracker::CryTracker;
use crate::backend::AudioClassifier;
use crate::config::AudioConfig;
use crate::error::BackendError;
use crate::events::{EventBus, VisionEvent};
use crate::stage::{ErrorThrottle, SnapshotCell, Snapshottable};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, trace, warn};

/// How long the worker waits for audio before re-checking the stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(200);

const MIN_INFER_HZ: f64 = 0.1;
const MIN_WINDOW_SECONDS: f64 = 0.5;
const MIN_LOG_INTERVAL_SECONDS: f64 = 0.5;

/// Published state of the cry monitor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CryState {
    pub enabled: bool,
    pub cry_detected: bool,
    pub cry_score: f32,
    pub top_label: String,
    pub top_score: f32,
    pub alarm_active: bool,
    /// Detection flags of the latest inferences, oldest first
    pub recent_predictions: Vec<bool>,
    pub last_audio_timestamp: Option<DateTime<Utc>>,
    pub disable_reason: Option<String>,
}

impl CryState {
    pub fn disabled<S: Into<String>>(reason: S) -> Self {
        Self {
            disable_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CryMonitorStats {
    pub chunks_received: u64,
    pub chunks_dropped: u64,
    pub windows_sliced: u64,
    pub inferences: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    chunks_received: AtomicU64,
    chunks_dropped: AtomicU64,
    windows_sliced: AtomicU64,
    inferences: AtomicU64,
    failures: AtomicU64,
}

/// Watches the audio track for crying
///
/// Audio goes through a bounded queue into a dedicated worker thread that
/// down-mixes, resamples and slices it into fixed windows for the
/// classifier. When the classifier cannot be loaded the monitor stays
/// disabled and only ever reports that.
pub struct CryMonitor {
    sender: Option<Sender<AudioChunk>>,
    state: Arc<SnapshotCell<CryState>>,
    counters: Arc<Counters>,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CryMonitor {
    pub fn new(
        config: &AudioConfig,
        classifier: Result<Arc<dyn AudioClassifier>, BackendError>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        if !config.enabled {
            info!("Cry monitor disabled by configuration");
            return Self::disabled("disabled by configuration");
        }

        let classifier = match classifier {
            Ok(classifier) => classifier,
            Err(e) => {
                warn!("Cry monitor disabled (classifier unavailable): {}", e);
                return Self::disabled(e.to_string());
            }
        };

        let class_names = match classifier.class_names() {
            Ok(names) if !names.is_empty() => names,
            Ok(_) => {
                warn!("Cry monitor disabled: classifier reported no classes");
                return Self::disabled("classifier reported no classes");
            }
            Err(e) => {
                warn!("Cry monitor disabled (class map unavailable): {}", e);
                return Self::disabled(e.to_string());
            }
        };
        info!("Audio class map loaded ({} classes)", class_names.len());

        let cry_indices = cry_class_indices(&class_names, &config.cry_keywords);
        if cry_indices.is_empty() {
            warn!("Cry monitor disabled: no class matches the cry keywords");
            return Self::disabled("no class matches the cry keywords");
        }

        let state = Arc::new(SnapshotCell::new(CryState {
            enabled: true,
            ..CryState::default()
        }));
        let counters = Arc::new(Counters::default());
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = channel::bounded(config.queue_capacity.max(1));

        let infer_hz = config.infer_hz.max(MIN_INFER_HZ);
        let chunk_samples =
            ((config.chunk_seconds * f64::from(config.sample_rate)) as usize).max(1);

        info!(
            "Cry monitor enabled: window={:.1}s infer_hz={:.1} classes={}",
            config.window_seconds.max(MIN_WINDOW_SECONDS),
            infer_hz,
            cry_indices.len()
        );

        let worker = CryWorker {
            classifier,
            class_names,
            cry_indices,
            target_rate: config.sample_rate,
            chunk_samples,
            infer_interval: Duration::from_secs_f64(1.0 / infer_hz),
            log_interval: Duration::from_secs_f64(
                config.log_interval_seconds.max(MIN_LOG_INTERVAL_SECONDS),
            ),
            tracker: CryTracker::from_config(config),
            buffer: Vec::with_capacity(chunk_samples * 2),
            current: state.load().as_ref().clone(),
            last_inference: None,
            last_log: None,
            state: Arc::clone(&state),
            counters: Arc::clone(&counters),
            event_bus,
            error_throttle: ErrorThrottle::default(),
        };

        let worker_stop = Arc::clone(&stop_flag);
        let spawned = std::thread::Builder::new()
            .name("cry-monitor".to_string())
            .spawn(move || worker.run(receiver, worker_stop));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to start cry monitor worker: {}", e);
                return Self::disabled(format!("worker thread failed to start: {}", e));
            }
        };

        info!(
            "Cry monitor worker started (chunk={:.1}s step={:.1}s)",
            config.chunk_seconds, config.chunk_seconds
        );

        Self {
            sender: Some(sender),
            state,
            counters,
            stop_flag,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// A monitor that does nothing but report `reason`
    pub fn disabled<S: Into<String>>(reason: S) -> Self {
        Self {
            sender: None,
            state: Arc::new(SnapshotCell::new(CryState::disabled(reason))),
            counters: Arc::new(Counters::default()),
            stop_flag: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue audio for analysis without ever blocking
    ///
    /// Returns false when the chunk was not accepted (monitor disabled or
    /// stopped, empty chunk, or queue full).
    pub fn ingest(&self, chunk: AudioChunk) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        if chunk.is_empty() || self.stop_flag.load(Ordering::Relaxed) {
            return false;
        }

        match sender.try_send(chunk) {
            Ok(()) => {
                self.counters.chunks_received.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Cry monitor queue full, dropping audio chunk");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn state(&self) -> CryState {
        self.state.load().as_ref().clone()
    }

    pub fn stats(&self) -> CryMonitorStats {
        CryMonitorStats {
            chunks_received: self.counters.chunks_received.load(Ordering::Relaxed),
            chunks_dropped: self.counters.chunks_dropped.load(Ordering::Relaxed),
            windows_sliced: self.counters.windows_sliced.load(Ordering::Relaxed),
            inferences: self.counters.inferences.load(Ordering::Acquire),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker and wait for it to exit
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);

        let Some(handle) = self.worker.lock().take() else {
            debug!("Cry monitor already stopped");
            return;
        };

        info!("Stopping cry monitor");
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => info!("Cry monitor stopped"),
            Ok(Err(_)) => error!("Cry monitor worker panicked"),
            Err(e) => error!("Failed to join cry monitor worker: {}", e),
        }
    }
}

impl Snapshottable for CryMonitor {
    type Snapshot = CryState;

    fn snapshot(&self) -> Arc<CryState> {
        self.state.load()
    }
}

impl Drop for CryMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
    }
}

/// Indices of the classes whose name contains one of `keywords`
pub fn cry_class_indices(class_names: &[String], keywords: &[String]) -> Vec<usize> {
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

    class_names
        .iter()
        .enumerate()
        .filter(|(_, name)| {
            let name = name.trim().to_lowercase();
            keywords.iter().any(|k| name.contains(k.as_str()))
        })
        .map(|(index, _)| index)
        .collect()
}

struct CryWorker {
    classifier: Arc<dyn AudioClassifier>,
    class_names: Vec<String>,
    cry_indices: Vec<usize>,
    target_rate: u32,
    chunk_samples: usize,
    infer_interval: Duration,
    log_interval: Duration,
    tracker: CryTracker,
    buffer: Vec<f32>,
    current: CryState,
    last_inference: Option<Instant>,
    last_log: Option<Instant>,
    state: Arc<SnapshotCell<CryState>>,
    counters: Arc<Counters>,
    event_bus: Option<Arc<EventBus>>,
    error_throttle: ErrorThrottle,
}

impl CryWorker {
    fn run(mut self, receiver: Receiver<AudioChunk>, stop_flag: Arc<AtomicBool>) {
        debug!("Cry monitor worker running");

        while !stop_flag.load(Ordering::Acquire) {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => self.ingest(chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("Cry monitor worker exiting");
    }

    fn ingest(&mut self, chunk: AudioChunk) {
        let mono = chunk.to_mono();
        let mono = resample_linear(&mono, chunk.sample_rate, self.target_rate);

        self.current.last_audio_timestamp = Some(Utc::now());
        self.state.store(self.current.clone());

        if mono.is_empty() {
            return;
        }
        self.buffer.extend_from_slice(&mono);

        // non-overlapping windows; windows inside the rate limit are discarded
        while self.buffer.len() >= self.chunk_samples {
            let window: Vec<f32> = self.buffer.drain(..self.chunk_samples).collect();
            self.counters.windows_sliced.fetch_add(1, Ordering::Relaxed);

            let now = Instant::now();
            if self
                .last_inference
                .is_some_and(|last| now.duration_since(last) < self.infer_interval)
            {
                continue;
            }
            self.last_inference = Some(now);
            self.classify(&window, now);
        }
    }

    fn classify(&mut self, window: &[f32], now: Instant) {
        let scores = match self.classifier.infer(window) {
            Ok(scores) => scores,
            Err(e) => return self.record_failure(e),
        };

        let Some(cry_score) = self
            .cry_indices
            .iter()
            .filter_map(|&i| scores.get(i).copied())
            .reduce(f32::max)
        else {
            return self.record_failure(BackendError::InvalidOutput {
                details: format!("{} scores for {} classes", scores.len(), self.class_names.len()),
            });
        };

        let (top_index, top_score) = scores
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0));
        let top_label = self
            .class_names
            .get(top_index)
            .cloned()
            .unwrap_or_else(|| top_index.to_string());

        let was_detected = self.tracker.is_detected();
        let detected = self.tracker.update(cry_score);
        let inference = self.counters.inferences.load(Ordering::Relaxed);

        self.current.cry_score = cry_score;
        self.current.top_label = top_label;
        self.current.top_score = top_score;
        self.current.cry_detected = detected;
        self.current.alarm_active = self.tracker.alarm_active();
        self.current.recent_predictions = self.tracker.recent();
        self.state.store(self.current.clone());

        debug!(
            "cry-frame | cry_score={:.3} top_label={} top_score={:.3}",
            cry_score, self.current.top_label, top_score
        );

        if detected && !was_detected {
            self.publish(VisionEvent::CryDetected {
                frame_number: inference,
                timestamp: SystemTime::now(),
                confidence: cry_score,
            });
        }

        if self
            .last_log
            .map_or(true, |last| now.duration_since(last) >= self.log_interval)
        {
            info!(
                "cry-monitor | cry_detected={} cry_score={:.3} top_label={} top_score={:.3} \
                 alarm={} recent={:?}",
                self.current.cry_detected,
                self.current.cry_score,
                self.current.top_label,
                self.current.top_score,
                self.current.alarm_active,
                self.current.recent_predictions
            );
            self.last_log = Some(now);
        }

        // counted last so a reader that sees the count also sees the state
        self.counters.inferences.fetch_add(1, Ordering::Release);
    }

    fn record_failure(&mut self, e: BackendError) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        if let Some(suppressed) = self.error_throttle.check() {
            error!(
                "Cry inference failed: {} ({} similar errors suppressed)",
                e, suppressed
            );
        }
    }

    fn publish(&self, event: VisionEvent) {
        if let Some(bus) = &self.event_bus {
            if let Err(e) = bus.publish(event) {
                debug!("Cry event not delivered: {}", e);
            }
        }
    }
}
