use crate::detection::{BoundingBox, Detection};
use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Notable results emitted by the detection stages
///
/// Events are fire-and-forget: they are broadcast to whoever is subscribed
/// at the time and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VisionEvent {
    /// The object stage published at least one detection
    ObjectDetected {
        frame_number: u64,
        timestamp: SystemTime,
        objects: Vec<Detection>,
    },
    /// The fall stage flagged a person as fallen (most confident one)
    FallDetected {
        frame_number: u64,
        timestamp: SystemTime,
        confidence: f32,
        bbox: BoundingBox,
    },
    /// The toddler stage saw a toddler (most confident one)
    ToddlerDetected {
        frame_number: u64,
        timestamp: SystemTime,
        confidence: f32,
        bbox: BoundingBox,
    },
    /// The cry monitor switched into the crying state
    CryDetected {
        frame_number: u64,
        timestamp: SystemTime,
        confidence: f32,
    },
    /// A component hit an error it recovered from
    StageError { component: String, error: String },
}

impl VisionEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            VisionEvent::ObjectDetected { timestamp, .. } => *timestamp,
            VisionEvent::FallDetected { timestamp, .. } => *timestamp,
            VisionEvent::ToddlerDetected { timestamp, .. } => *timestamp,
            VisionEvent::CryDetected { timestamp, .. } => *timestamp,
            VisionEvent::StageError { .. } => SystemTime::now(),
        }
    }

    /// Frame (or audio inference) number the event was computed from
    pub fn frame_number(&self) -> Option<u64> {
        match self {
            VisionEvent::ObjectDetected { frame_number, .. }
            | VisionEvent::FallDetected { frame_number, .. }
            | VisionEvent::ToddlerDetected { frame_number, .. }
            | VisionEvent::CryDetected { frame_number, .. } => Some(*frame_number),
            VisionEvent::StageError { .. } => None,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            VisionEvent::ObjectDetected {
                frame_number,
                objects,
                ..
            } => {
                let labels: Vec<&str> = objects.iter().map(|o| o.label.as_str()).collect();
                format!(
                    "Frame {}: {} object(s) detected [{}]",
                    frame_number,
                    objects.len(),
                    labels.join(", ")
                )
            }
            VisionEvent::FallDetected {
                frame_number,
                confidence,
                ..
            } => format!(
                "Frame {}: fall detected (confidence {:.2})",
                frame_number, confidence
            ),
            VisionEvent::ToddlerDetected {
                frame_number,
                confidence,
                ..
            } => format!(
                "Frame {}: toddler detected (confidence {:.2})",
                frame_number, confidence
            ),
            VisionEvent::CryDetected { confidence, .. } => {
                format!("Crying detected (score {:.3})", confidence)
            }
            VisionEvent::StageError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            VisionEvent::ObjectDetected { .. } => "object_detected",
            VisionEvent::FallDetected { .. } => "fall_detected",
            VisionEvent::ToddlerDetected { .. } => "toddler_detected",
            VisionEvent::CryDetected { .. } => "cry_detected",
            VisionEvent::StageError { .. } => "stage_error",
        }
    }
}

/// Broadcast bus carrying [`VisionEvent`]s to the alerting layer
pub struct EventBus {
    sender: broadcast::Sender<VisionEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<VisionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Never blocks; usable from both async tasks and worker threads.
    pub fn publish(&self, event: VisionEvent) -> Result<usize, EventBusError> {
        match &event {
            VisionEvent::FallDetected { confidence, .. } => {
                warn!("Fall detected (confidence {:.2})", confidence);
            }
            VisionEvent::CryDetected { confidence, .. } => {
                info!("Crying detected (score {:.3})", confidence);
            }
            _ => {
                debug!("Publishing event: {}", event.description());
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &VisionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<VisionEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<VisionEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<VisionEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // alerting only cares about recent events
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
