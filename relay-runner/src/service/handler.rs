//! Resource request handler
//!
//! Decodes each request message and runs it through the deployment service
//! inside a span keyed by operation and step.

use async_trait::async_trait;
use relay_bus::{Disposition, MessageHandler, ReceivedMessage};
use relay_core::dto::request::ResourceRequestMessage;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};

use crate::service::DeploymentService;

/// Consumes resource request messages
///
/// Every message is completed once handled: failures are reported on the
/// status queue rather than by redelivery, and a malformed payload would fail
/// the same way on every delivery.
pub struct RequestHandler {
    service: Arc<DeploymentService>,
}

impl RequestHandler {
    pub fn new(service: Arc<DeploymentService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for RequestHandler {
    async fn handle(&self, message: &ReceivedMessage) -> Disposition {
        let request = match ResourceRequestMessage::parse(&message.body) {
            Ok(request) => request,
            Err(e) => {
                error!("Dropping resource request {}: {}", message.sequence_number, e);
                return Disposition::Complete;
            }
        };

        let span = info_span!(
            "resource_request",
            operation_id = %request.operation_id,
            step_id = %request.step_id,
            resource_id = %request.id,
        );

        async {
            info!("Message received with id={}", request.id);
            let succeeded = self.service.invoke_porter_action(&request).await;
            info!("Request finished, succeeded={}", succeeded);
        }
        .instrument(span)
        .await;

        Disposition::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::{ScriptedRunner, ok};
    use crate::config::RunnerConfig;
    use crate::credential::Credential;
    use relay_bus::InMemoryBroker;

    fn handler(broker: &InMemoryBroker, runner: Arc<ScriptedRunner>) -> RequestHandler {
        let config = Arc::new(RunnerConfig {
            vmss_msi_id: Some("msi".to_string()),
            ..Default::default()
        });
        let credential = Arc::new(Credential::open(&config).unwrap());
        let service = DeploymentService::new(config, credential, runner, Arc::new(broker.clone()));
        RequestHandler::new(Arc::new(service))
    }

    fn received(body: &str) -> ReceivedMessage {
        ReceivedMessage {
            body: body.as_bytes().to_vec(),
            session_id: "s".to_string(),
            correlation_id: "c".to_string(),
            sequence_number: 1,
            delivery_count: 1,
        }
    }

    #[tokio::test]
    async fn test_malformed_request_is_completed_without_running() {
        let broker = InMemoryBroker::new(["deployment-status-update"]);
        let runner = Arc::new(ScriptedRunner::new(|_| ok("")));
        let handler = handler(&broker, runner.clone());

        let disposition = handler.handle(&received("{ not json")).await;

        assert_eq!(disposition, Disposition::Complete);
        assert!(runner.calls().is_empty());
        assert!(broker.pending_messages("deployment-status-update").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_request_is_still_completed() {
        let broker = InMemoryBroker::new(["deployment-status-update"]);
        let runner = Arc::new(ScriptedRunner::new(|_| crate::command::testing::failed("boom")));
        let handler = handler(&broker, runner);

        let body = r#"{
            "id": "0f8e7d6c-5b4a-4392-8170-6f5e4d3c2b1a",
            "action": "install",
            "stepId": "main",
            "operationId": "1a2b3c4d-5e6f-4a8b-9c0d-1e2f3a4b5c6d",
            "name": "tre-workspace-base",
            "version": "0.4.0"
        }"#;
        let disposition = handler.handle(&received(body)).await;

        assert_eq!(disposition, Disposition::Complete);
        let sent = broker.pending_messages("deployment-status-update").await.unwrap();
        assert_eq!(sent.len(), 2);
    }
}
