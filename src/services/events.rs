//! Publishing order events to the outside world.

use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;

use crate::domain::events::OrderEvent;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to publish event: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError>;
}

/// Publishes JSON-encoded events to NATS, one subject per event kind.
#[derive(Debug, Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }

    pub async fn connect(url: &str) -> Result<Self, PublishError> {
        let client = async_nats::connect(url).await.map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .publish(event.subject().to_string(), payload.into())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

/// Drops every event. Used when no broker is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _event: &OrderEvent) -> Result<(), PublishError> { Ok(()) }
}

/// Keeps published events in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<OrderEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<OrderEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        self.events
            .lock()
            .map_err(|e| PublishError::Transport(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Publishes each event. Failures are only logged; the state change the
/// events describe is already committed.
pub(crate) async fn publish_all(publisher: &dyn EventPublisher, events: Vec<OrderEvent>) {
    for event in events {
        if let Err(error) = publisher.publish(&event).await {
            tracing::warn!(order_id = %event.order_id(), subject = event.subject(), %error, "failed to publish order event");
        }
    }
}
