use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Anything that can be registered with a [`FrameDistributor`](super::FrameDistributor)
///
/// `on_frame` runs on its own task for every admitted frame, so an
/// implementation that is slow only ever delays itself.
#[async_trait]
pub trait FrameConsumer: Send + Sync {
    async fn on_frame(&self, frame: Frame);
}

/// Handle returned by `register`, used to unregister later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub(crate) u64);

/// Per-consumer delivery counters
#[derive(Debug, Clone)]
pub struct ConsumerStats {
    pub name: String,
    pub target_rate_hz: f64,
    pub frames_delivered: u64,
}

/// Slack allowed when comparing a frame gap against the consumer interval,
/// so timestamp rounding in the source cannot push a delivery one frame late.
const GATE_TOLERANCE: Duration = Duration::from_millis(1);

/// Presentation-time rate gate shared by consumer delivery and intake throttling
///
/// A frame is due once a full interval (less [`GATE_TOLERANCE`]) has passed
/// since the last admitted frame. A timestamp that goes backwards means the
/// source restarted its clock and is always admitted.
#[derive(Debug, Clone)]
pub(crate) struct RateGate {
    interval: Duration,
    last_admitted: Option<Duration>,
}

impl RateGate {
    pub(crate) fn new(rate_hz: f64) -> Self {
        Self {
            interval: rate_to_interval(rate_hz),
            last_admitted: None,
        }
    }

    pub(crate) fn admit(&mut self, pts: Duration) -> bool {
        let due = match self.last_admitted {
            None => true,
            Some(last) if pts < last => true,
            Some(last) => pts - last + GATE_TOLERANCE >= self.interval,
        };

        if due {
            self.last_admitted = Some(pts);
        }
        due
    }
}

pub(crate) struct Registration {
    pub(crate) id: ConsumerId,
    pub(crate) name: String,
    pub(crate) consumer: Arc<dyn FrameConsumer>,
    target_rate_hz: f64,
    gate: RateGate,
    frames_delivered: u64,
}

impl Registration {
    pub(crate) fn new(
        id: ConsumerId,
        name: String,
        consumer: Arc<dyn FrameConsumer>,
        target_rate_hz: f64,
    ) -> Self {
        Self {
            id,
            name,
            consumer,
            target_rate_hz,
            gate: RateGate::new(target_rate_hz),
            frames_delivered: 0,
        }
    }

    /// Decide whether the frame at `pts` is due for this consumer
    pub(crate) fn admit(&mut self, pts: Duration) -> bool {
        let due = self.gate.admit(pts);
        if due {
            self.frames_delivered += 1;
        }
        due
    }

    pub(crate) fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            name: self.name.clone(),
            target_rate_hz: self.target_rate_hz,
            frames_delivered: self.frames_delivered,
        }
    }
}

/// Interval between deliveries; non-positive rates mean "every frame"
fn rate_to_interval(rate_hz: f64) -> Duration {
    if rate_hz.is_finite() && rate_hz > 0.0 {
        Duration::from_secs_f64(1.0 / rate_hz)
    } else {
        Duration::ZERO
    }
}
