//! Broadcast-backed event publisher.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::{OrchestratorEvent, PublishedEvent};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event channel error: {0}")]
    Channel(String),
}

/// Outbound contract for lifecycle events. The orchestrator only depends on
/// this trait, so deployments can swap the broadcast publisher for a bridge
/// into an external bus.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: OrchestratorEvent) -> Result<(), PublishError>;
}

/// In-process publisher over a `tokio::sync::broadcast` channel.
///
/// "No subscribers" is success: the orchestrator runs the same with or
/// without listeners attached.
#[derive(Debug)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish, logging instead of failing when delivery is impossible.
    /// Every hot-path call site uses this; scheduling never waits on
    /// event delivery.
    pub fn emit(&self, event: OrchestratorEvent) {
        let name = event.name();
        match self.try_publish(event) {
            Ok(receivers) => debug!(event = name, receivers, "event published"),
            Err(error) => warn!(event = name, %error, "event publish failed"),
        }
    }

    fn try_publish(&self, event: OrchestratorEvent) -> Result<usize, PublishError> {
        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }
        self.sender
            .send(PublishedEvent::now(event))
            .map_err(|error| PublishError::Channel(error.to_string()))
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait]
impl EventSink for EventPublisher {
    async fn publish(&self, event: OrchestratorEvent) -> Result<(), PublishError> {
        self.try_publish(event).map(|_| ())
    }
}
