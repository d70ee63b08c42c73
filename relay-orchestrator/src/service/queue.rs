use relay_bus::{BusError, OutgoingMessage, SessionBroker};
use relay_core::dto::request::ResourceRequestMessage;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to encode resource request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Sender side of the resource request queue
///
/// Every request is keyed by its target resource (session id) and its
/// operation (correlation id), so all requests for one resource are handled
/// in order by a single worker.
#[derive(Clone)]
pub struct RequestQueue {
    broker: Arc<dyn SessionBroker>,
    queue: String,
}

impl RequestQueue {
    pub fn new(broker: Arc<dyn SessionBroker>, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
        }
    }

    pub async fn send(&self, request: &ResourceRequestMessage) -> Result<(), QueueError> {
        let body = request.to_body()?;
        let message = OutgoingMessage::new(body, request.id.to_string(), request.operation_id.to_string());

        info!(
            "Sending resource request message with correlation ID {}, action: {}",
            message.correlation_id, request.action
        );
        self.broker.send(&self.queue, message).await?;
        Ok(())
    }
}
