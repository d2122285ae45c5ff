use super::consumer::{ConsumerId, ConsumerStats, FrameConsumer, RateGate, Registration};
use super::queue::FrameQueue;
use super::source::FrameSource;
use crate::error::{DistributorError, Result};
use crate::frame::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Fans one video source out to many consumers, each at its own rate
///
/// Frames from the source land in a small drop-oldest queue; a single
/// dispatch task drains it and hands each frame to every consumer whose
/// interval has elapsed. Each delivery runs on its own task, so neither the
/// source nor other consumers ever wait on a slow consumer.
pub struct FrameDistributor {
    name: String,
    queue: Arc<FrameQueue>,
    consumers: Arc<Mutex<Vec<Registration>>>,
    next_consumer_id: AtomicU64,
    max_rate_hz: Option<f64>,
    is_running: AtomicBool,
    is_stopped: AtomicBool,
    cancellation_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    frames_received: Arc<AtomicU64>,
    frames_throttled: Arc<AtomicU64>,
    frames_dispatched: Arc<AtomicU64>,
}

/// Snapshot of distributor counters
#[derive(Debug, Clone)]
pub struct DistributorStats {
    pub frames_received: u64,
    pub frames_throttled: u64,
    pub frames_dropped: u64,
    pub frames_dispatched: u64,
    pub queued: usize,
    pub consumers: Vec<ConsumerStats>,
}

impl FrameDistributor {
    /// Create a distributor with an intake queue of `buffer_capacity` frames
    pub fn new<S: Into<String>>(name: S, buffer_capacity: usize) -> Self {
        let name = name.into();
        debug!(
            "Created frame distributor '{}' (buffer capacity {})",
            name, buffer_capacity
        );

        Self {
            name,
            queue: Arc::new(FrameQueue::new(buffer_capacity)),
            consumers: Arc::new(Mutex::new(Vec::new())),
            next_consumer_id: AtomicU64::new(0),
            max_rate_hz: None,
            is_running: AtomicBool::new(false),
            is_stopped: AtomicBool::new(false),
            cancellation_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            frames_received: Arc::new(AtomicU64::new(0)),
            frames_throttled: Arc::new(AtomicU64::new(0)),
            frames_dispatched: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Ignore source frames arriving faster than `rate_hz`
    pub fn with_max_rate(mut self, rate_hz: f64) -> Self {
        self.max_rate_hz = Some(rate_hz);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a consumer that wants frames at `target_rate_hz`
    pub fn register<S: Into<String>>(
        &self,
        consumer: Arc<dyn FrameConsumer>,
        target_rate_hz: f64,
        name: S,
    ) -> ConsumerId {
        let id = ConsumerId(self.next_consumer_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();

        info!(
            "Registering consumer '{}' on '{}' at {:.2} Hz",
            name, self.name, target_rate_hz
        );

        self.consumers
            .lock()
            .push(Registration::new(id, name, consumer, target_rate_hz));
        id
    }

    /// Remove a consumer; returns false if it was not registered
    pub fn unregister(&self, id: ConsumerId) -> bool {
        let mut consumers = self.consumers.lock();
        match consumers.iter().position(|r| r.id == id) {
            Some(index) => {
                let registration = consumers.remove(index);
                info!(
                    "Unregistered consumer '{}' from '{}'",
                    registration.name, self.name
                );
                true
            }
            None => false,
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Subscribe to `source` and start dispatching
    pub fn start(&self, source: Box<dyn FrameSource>) -> Result<()> {
        if self.is_stopped.load(Ordering::Relaxed) {
            return Err(DistributorError::Stopped {
                name: self.name.clone(),
            }
            .into());
        }
        if self.is_running.swap(true, Ordering::AcqRel) {
            return Err(DistributorError::AlreadyRunning {
                name: self.name.clone(),
            }
            .into());
        }

        info!("Starting frame distributor '{}'", self.name);

        let intake = tokio::spawn(Self::intake_loop(
            self.name.clone(),
            source,
            Arc::clone(&self.queue),
            self.max_rate_hz.map(RateGate::new),
            Arc::clone(&self.frames_received),
            Arc::clone(&self.frames_throttled),
            self.cancellation_token.clone(),
        ));

        let dispatch = tokio::spawn(Self::dispatch_loop(
            self.name.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.consumers),
            Arc::clone(&self.frames_dispatched),
            self.cancellation_token.clone(),
        ));

        let mut tasks = self.tasks.lock();
        tasks.push(intake);
        tasks.push(dispatch);
        Ok(())
    }

    /// Stop dispatching, drop every consumer and release the source
    ///
    /// Safe to call any number of times; only the first call does anything.
    pub async fn stop(&self) {
        if self.is_stopped.swap(true, Ordering::AcqRel) {
            debug!("Frame distributor '{}' already stopped", self.name);
            return;
        }

        info!("Stopping frame distributor '{}'", self.name);

        self.consumers.lock().clear();
        self.cancellation_token.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Frame distributor '{}' task failed: {}", self.name, e);
            }
        }

        self.queue.clear();
        self.is_running.store(false, Ordering::Release);
        info!("Frame distributor '{}' stopped", self.name);
    }

    pub fn stats(&self) -> DistributorStats {
        DistributorStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_throttled: self.frames_throttled.load(Ordering::Relaxed),
            frames_dropped: self.queue.frames_dropped(),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            queued: self.queue.len(),
            consumers: self.consumers.lock().iter().map(|r| r.stats()).collect(),
        }
    }

    async fn intake_loop(
        name: String,
        mut source: Box<dyn FrameSource>,
        queue: Arc<FrameQueue>,
        mut intake_gate: Option<RateGate>,
        frames_received: Arc<AtomicU64>,
        frames_throttled: Arc<AtomicU64>,
        token: CancellationToken,
    ) {
        debug!("Intake task for '{}' started", name);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = source.next_frame() => {
                    let Some(frame) = next else {
                        info!("Video source for '{}' ended", name);
                        break;
                    };
                    frames_received.fetch_add(1, Ordering::Relaxed);

                    if let Some(gate) = intake_gate.as_mut() {
                        if !gate.admit(frame.pts) {
                            frames_throttled.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    }
                    queue.push(frame);
                }
            }
        }

        source.close().await;
        debug!("Intake task for '{}' finished", name);
    }

    async fn dispatch_loop(
        name: String,
        queue: Arc<FrameQueue>,
        consumers: Arc<Mutex<Vec<Registration>>>,
        frames_dispatched: Arc<AtomicU64>,
        token: CancellationToken,
    ) {
        debug!("Dispatch task for '{}' started", name);

        loop {
            while let Some(frame) = queue.pop() {
                if token.is_cancelled() {
                    break;
                }
                Self::dispatch_frame(&consumers, frame);
                frames_dispatched.fetch_add(1, Ordering::Relaxed);
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = queue.wait() => {}
            }
        }

        debug!("Dispatch task for '{}' finished", name);
    }

    fn dispatch_frame(consumers: &Mutex<Vec<Registration>>, frame: Frame) {
        let mut consumers = consumers.lock();
        for registration in consumers.iter_mut() {
            if !registration.admit(frame.pts) {
                continue;
            }

            trace!("Delivering frame {} to '{}'", frame.seq, registration.name);
            let consumer = Arc::clone(&registration.consumer);
            let frame = frame.clone();
            tokio::spawn(async move {
                consumer.on_frame(frame).await;
            });
        }
    }
}

impl Drop for FrameDistributor {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
