use super::consumer::{ConsumerId, FrameConsumer};
use super::dispatch::FrameDistributor;
use super::source::FrameSource;
use crate::error::Result;
use std::sync::Arc;
use tracing::debug;

/// Intake buffer size of distributors created for a single consumer
pub const OWNED_BUFFER_CAPACITY: usize = 5;

/// Where a consumer gets its frames from
pub enum VideoInput {
    /// Join a distributor that someone else owns and stops
    Shared(Arc<FrameDistributor>),
    /// Spin up a private distributor over this source
    Source(Box<dyn FrameSource>),
}

/// A consumer's registration on a distributor, plus whether it owns it
pub struct Attachment {
    distributor: Arc<FrameDistributor>,
    consumer_id: ConsumerId,
    owns_distributor: bool,
}

impl Attachment {
    /// Register `consumer` at `fps` on the given input
    pub fn attach(
        input: VideoInput,
        consumer: Arc<dyn FrameConsumer>,
        fps: f64,
        name: &str,
    ) -> Result<Self> {
        let (distributor, owns_distributor) = match input {
            VideoInput::Shared(distributor) => (distributor, false),
            VideoInput::Source(source) => {
                let distributor = Arc::new(
                    FrameDistributor::new(format!("{}_forwarder", name), OWNED_BUFFER_CAPACITY)
                        .with_max_rate(fps.max(1.0)),
                );
                distributor.start(source)?;
                (distributor, true)
            }
        };

        let consumer_id = distributor.register(consumer, fps, format!("{}_handler", name));
        debug!(
            "Attached '{}' to '{}' (owned: {})",
            name,
            distributor.name(),
            owns_distributor
        );

        Ok(Self {
            distributor,
            consumer_id,
            owns_distributor,
        })
    }

    pub fn distributor(&self) -> &Arc<FrameDistributor> {
        &self.distributor
    }

    pub fn owns_distributor(&self) -> bool {
        self.owns_distributor
    }

    /// Unregister, and stop the distributor if this attachment created it
    pub async fn detach(self) {
        self.distributor.unregister(self.consumer_id);
        if self.owns_distributor {
            self.distributor.stop().await;
        }
    }
}
