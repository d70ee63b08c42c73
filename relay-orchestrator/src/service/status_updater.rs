//! Deployment Status Updater
//!
//! Consumes status updates from the resource processor and applies them to
//! the operation ledger:
//! - Records the step's status and recomputes the operation's status
//! - Mirrors the step status onto the resource it deployed
//! - Merges deployment outputs into that resource's properties
//! - Sends the next step of the pipeline once a step succeeds
//!
//! Whether a message is completed or abandoned is decided here: transient
//! store or queue problems abandon it for redelivery, permanent ones complete
//! it so it is not retried forever.

use async_trait::async_trait;
use chrono::Utc;
use relay_bus::{Disposition, MessageHandler, ReceivedMessage};
use relay_core::domain::operation::Operation;
use relay_core::domain::status::Status;
use relay_core::dto::status_update::DeploymentStatusUpdateMessage;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::repository::{RepositoryError, Repositories};
use crate::service::queue::{QueueError, RequestQueue};
use crate::service::step::{StepError, update_resource_for_step};

/// No step of the operation matches both the step id and the resource id
#[derive(Debug, Error)]
#[error("Error finding step {step_id} for resource {resource_id} in operation {operation_id}")]
pub struct StepNotFoundError {
    pub operation_id: Uuid,
    pub step_id: String,
    pub resource_id: Uuid,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    StepNotFound(#[from] StepNotFoundError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Why the next step of a pipeline could not be sent
#[derive(Debug, Error)]
enum AdvanceError {
    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct DeploymentStatusUpdater {
    repos: Repositories,
    queue: RequestQueue,
}

impl DeploymentStatusUpdater {
    pub fn new(repos: Repositories, queue: RequestQueue) -> Self {
        Self { repos, queue }
    }

    /// Handles one raw status message; `true` means it can be completed
    ///
    /// A body that does not parse is abandoned rather than dropped, since it
    /// may be a transient glitch upstream; the broker dead-letters it after
    /// repeated failures.
    pub async fn process_message(&self, body: &[u8]) -> bool {
        let message = match DeploymentStatusUpdateMessage::parse(body) {
            Ok(message) => message,
            Err(e) => {
                error!("Deployment status message format is incorrect: {}", e);
                return false;
            }
        };

        let span = info_span!(
            "deployment_status",
            operation_id = %message.operation_id,
            step_id = %message.step_id,
            resource_id = %message.id,
        );

        async {
            info!("Received status {} for resource {}", message.status, message.id);
            self.update_status_in_database(&message).await
        }
        .instrument(span)
        .await
    }

    /// Applies `message` to the ledger; `true` means it can be completed
    pub async fn update_status_in_database(&self, message: &DeploymentStatusUpdateMessage) -> bool {
        match self.apply(message).await {
            Ok(()) => true,
            Err(UpdateError::Repository(e)) if e.is_not_found() => {
                // Retrying will never find it
                error!("Failed to update status, {}", e);
                true
            }
            Err(UpdateError::Repository(e)) if e.is_conflict() => {
                warn!("Concurrent update, will retry: {}", e);
                false
            }
            Err(e) => {
                error!("Failed to update status: {}", e);
                false
            }
        }
    }

    async fn apply(&self, message: &DeploymentStatusUpdateMessage) -> Result<(), UpdateError> {
        let mut operation = self.repos.operations.get(message.operation_id).await?;

        let index = operation
            .find_step(&message.step_id, message.id)
            .ok_or_else(|| StepNotFoundError {
                operation_id: message.operation_id,
                step_id: message.step_id.clone(),
                resource_id: message.id,
            })?;

        // A redelivered message for a finished step must not apply or advance twice
        let current = operation.steps[index].status;
        if current.is_terminal() {
            info!(
                "Step {} is already {}, ignoring status {}",
                message.step_id, current, message.status
            );
            return Ok(());
        }

        {
            let step = &mut operation.steps[index];
            step.status = message.status;
            step.message = message.message.clone();
            step.updated_when = Utc::now();
        }
        operation.update_overall_status(index);

        // Resource writes come before the step is recorded: if any of them
        // fails the step stays open in the store and a redelivery redoes them
        let step = operation.steps[index].clone();
        self.update_resource(message, step.resource_id, step.status).await?;
        self.propagate_pipeline_failure(&operation).await?;
        let mut operation = self.repos.operations.update(&operation).await?;

        if !step.is_success() {
            debug!("Step {} is {}, nothing to advance", step.id, step.status);
            return Ok(());
        }

        if operation.is_last_step(index) {
            info!("Operation {} finished with status {}", operation.id, operation.status);
            return Ok(());
        }

        let next = index + 1;
        if let Err(e) = self.advance(&operation, next).await {
            error!("Unable to send update for resource in pipeline step: {}", e);
            let next_step = &mut operation.steps[next];
            next_step.status = Status::UpdatingFailed;
            next_step.message = e.to_string();
            next_step.updated_when = Utc::now();
            operation.update_overall_status(next);
            self.propagate_pipeline_failure(&operation).await?;
            self.repos.operations.update(&operation).await?;
        }

        Ok(())
    }

    /// Mirrors the step status onto the resource, merging outputs on success
    async fn update_resource(
        &self,
        message: &DeploymentStatusUpdateMessage,
        resource_id: Uuid,
        status: Status,
    ) -> Result<(), RepositoryError> {
        let mut resource = self.repos.resources.get(resource_id).await?;
        resource.deployment_status = status;

        if status.is_success() {
            for output in &message.outputs {
                if let Some(value) = output.property_value() {
                    resource.properties.insert(output.name.clone(), value);
                }
            }
        }

        self.repos.resources.update(&resource).await?;
        Ok(())
    }

    /// A failed multi step pipeline also fails the resource the operation was
    /// requested on, even when the failing step targeted another resource
    async fn propagate_pipeline_failure(&self, operation: &Operation) -> Result<(), RepositoryError> {
        if operation.steps.len() == 1 || !operation.status.is_failure() {
            return Ok(());
        }
        let Some(main_step) = operation.main_step() else {
            return Ok(());
        };

        let mut primary = self.repos.resources.get(main_step.resource_id).await?;
        if primary.deployment_status == operation.status {
            return Ok(());
        }

        primary.deployment_status = operation.status;
        self.repos.resources.update(&primary).await?;
        Ok(())
    }

    async fn advance(&self, operation: &Operation, index: usize) -> Result<(), AdvanceError> {
        let next_step = &operation.steps[index];
        let resource_to_send =
            update_resource_for_step(&self.repos, next_step, &operation.action, None, &operation.user).await?;

        info!(
            "Sending next step in operation to deployment queue -> step_id: {}, action: {}",
            next_step.template_step_id, next_step.resource_action
        );
        let request = resource_to_send.request_message(operation.id, &next_step.id, next_step.resource_action.clone());
        self.queue.send(&request).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for DeploymentStatusUpdater {
    async fn handle(&self, message: &ReceivedMessage) -> Disposition {
        if self.process_message(&message.body).await {
            Disposition::Complete
        } else {
            Disposition::Abandon
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ResourceRequestSender;
    use crate::service::testing::{ConflictingResources, Fixture, REQUEST_QUEUE, firewall};
    use relay_bus::InMemoryBroker;
    use relay_core::domain::operation::{PIPELINE_RUNNING_MESSAGE, PIPELINE_SUCCEEDED_MESSAGE};
    use relay_core::domain::resource::Resource;
    use relay_core::domain::status::RequestAction;
    use relay_core::domain::user::User;
    use relay_core::dto::status_update::Output;
    use serde_json::json;
    use std::sync::Arc;

    fn updater(fixture: &Fixture) -> DeploymentStatusUpdater {
        DeploymentStatusUpdater::new(fixture.repos.clone(), fixture.queue.clone())
    }

    async fn start(fixture: &Fixture, resource: &Resource, action: RequestAction) -> Operation {
        ResourceRequestSender::new(fixture.repos.clone(), fixture.queue.clone())
            .send(resource, action, User::default(), false)
            .await
            .unwrap()
    }

    fn status(operation: &Operation, index: usize, status: Status, text: &str) -> DeploymentStatusUpdateMessage {
        let step = &operation.steps[index];
        DeploymentStatusUpdateMessage::new(operation.id, &step.id, step.resource_id, status, text)
    }

    /// Workspace install pipeline [pre(firewall), main(workspace), post(firewall)]
    async fn pipeline(fixture: &Fixture) -> (Resource, Resource, Operation) {
        let firewall = fixture.seed(firewall()).await;
        let workspace = fixture.workspace("ws one").await;
        let operation = start(fixture, &workspace, RequestAction::Install).await;
        (workspace, firewall, operation)
    }

    #[tokio::test]
    async fn test_single_step_operation_mirrors_step() {
        let fixture = Fixture::new().await;
        let workspace = fixture.workspace("ws one").await;
        let operation = start(&fixture, &workspace, RequestAction::Upgrade).await;
        let updater = updater(&fixture);

        assert!(
            updater
                .update_status_in_database(&status(&operation, 0, Status::Updating, "Job starting"))
                .await
        );
        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.status, Status::Updating);
        assert_eq!(stored.message, "Job starting");
        let resource = fixture.repos.resources.get(workspace.id).await.unwrap();
        assert_eq!(resource.deployment_status, Status::Updating);

        let done = status(&operation, 0, Status::Updated, "upgrade action completed successfully.")
            .with_outputs(vec![
                Output::new("ip", json!("'10.1.0.4'"), "string"),
                Output::new("locked", json!("\"True\""), "boolean"),
                Output::new("nothing", serde_json::Value::Null, "string"),
            ]);
        assert!(updater.update_status_in_database(&done).await);

        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.status, Status::Updated);
        assert_eq!(stored.message, "upgrade action completed successfully.");

        let resource = fixture.repos.resources.get(workspace.id).await.unwrap();
        assert_eq!(resource.deployment_status, Status::Updated);
        assert_eq!(resource.properties["ip"], "10.1.0.4");
        assert_eq!(resource.properties["locked"], true);
        assert!(!resource.properties.contains_key("nothing"));
        assert_eq!(resource.properties["display_name"], "ws one");

        // Single step operations send nothing further
        assert_eq!(fixture.sent_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_advancing_sends_exactly_one_request_for_next_step() {
        let fixture = Fixture::new().await;
        let (_, firewall, operation) = pipeline(&fixture).await;
        let updater = updater(&fixture);

        assert!(
            updater
                .update_status_in_database(&status(&operation, 0, Status::Updated, "done"))
                .await
        );

        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.status, Status::PipelineRunning);
        assert_eq!(stored.message, PIPELINE_RUNNING_MESSAGE);
        let firewall = fixture.repos.resources.get(firewall.id).await.unwrap();
        assert_eq!(firewall.deployment_status, Status::Updated);

        let sent = fixture.sent_requests().await;
        assert_eq!(sent.len(), 2);
        let (message, request) = &sent[1];
        assert_eq!(message.session_id, operation.steps[1].resource_id.to_string());
        assert_eq!(message.correlation_id, operation.id.to_string());
        assert_eq!(request.step_id, operation.steps[1].id);
        assert_eq!(request.action, RequestAction::Install);
    }

    #[tokio::test]
    async fn test_in_progress_update_does_not_advance() {
        let fixture = Fixture::new().await;
        let (_, _, operation) = pipeline(&fixture).await;

        assert!(
            updater(&fixture)
                .update_status_in_database(&status(&operation, 0, Status::Updating, "Job starting"))
                .await
        );

        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.status, Status::PipelineRunning);
        assert_eq!(stored.steps[0].status, Status::Updating);
        assert_eq!(fixture.sent_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_step_fails_pipeline_and_primary_resource() {
        let fixture = Fixture::new().await;
        let (workspace, firewall, operation) = pipeline(&fixture).await;

        assert!(
            updater(&fixture)
                .update_status_in_database(&status(&operation, 0, Status::UpdatingFailed, "boom"))
                .await
        );

        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.status, Status::DeploymentFailed);
        assert_eq!(stored.message, "Multi step pipeline failed on step pre");
        assert_eq!(stored.steps[1].status, Status::AwaitingDeployment);
        assert_eq!(stored.steps[2].status, Status::AwaitingUpdate);

        let firewall = fixture.repos.resources.get(firewall.id).await.unwrap();
        assert_eq!(firewall.deployment_status, Status::UpdatingFailed);
        let workspace = fixture.repos.resources.get(workspace.id).await.unwrap();
        assert_eq!(workspace.deployment_status, Status::DeploymentFailed);

        assert_eq!(fixture.sent_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_last_step_completes_pipeline() {
        let fixture = Fixture::new().await;
        let (workspace, _, operation) = pipeline(&fixture).await;
        let updater = updater(&fixture);

        for (index, step_status) in [(0, Status::Updated), (1, Status::Deployed), (2, Status::Updated)] {
            assert!(
                updater
                    .update_status_in_database(&status(&operation, index, step_status, "done"))
                    .await
            );
        }

        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.status, Status::Deployed);
        assert_eq!(stored.message, PIPELINE_SUCCEEDED_MESSAGE);
        assert!(stored.steps.iter().all(|s| s.is_success()));

        let workspace = fixture.repos.resources.get(workspace.id).await.unwrap();
        assert_eq!(workspace.deployment_status, Status::Deployed);
        assert_eq!(fixture.sent_requests().await.len(), 3);
    }

    #[tokio::test]
    async fn test_end_to_end_post_step_payload() {
        let fixture = Fixture::new().await;
        let (workspace, firewall, operation) = pipeline(&fixture).await;
        let updater = updater(&fixture);

        updater
            .update_status_in_database(&status(&operation, 0, Status::Updated, "done"))
            .await;

        // The workspace deployment reports a new display name as an output
        let main_done = status(&operation, 1, Status::Deployed, "done")
            .with_outputs(vec![Output::new("display_name", json!("ws renamed"), "string")]);
        assert!(updater.update_status_in_database(&main_done).await);

        let sent = fixture.sent_requests().await;
        assert_eq!(sent.len(), 3);
        let (message, request) = &sent[2];
        assert_eq!(message.session_id, firewall.id.to_string());
        assert_eq!(message.correlation_id, operation.id.to_string());
        assert_eq!(request.id, firewall.id);
        assert_eq!(request.step_id, operation.steps[2].id);
        assert_eq!(request.action, RequestAction::Upgrade);
        assert_eq!(request.parameters["requested_by"], "ws renamed");
        assert_eq!(
            request.parameters["rule_collections"],
            json!([{ "name": format!("arc_{}", workspace.id), "source": "ws renamed" }])
        );
    }

    #[tokio::test]
    async fn test_end_to_end_substitutes_declaring_resource_parent() {
        let fixture = Fixture::new().await;
        let firewall = fixture.seed(firewall()).await;
        let workspace = fixture.workspace("ws one").await;
        let service = fixture.service(&workspace, "guac").await;
        let operation = start(&fixture, &service, RequestAction::Install).await;
        assert_eq!(operation.steps.len(), 2);

        assert!(
            updater(&fixture)
                .update_status_in_database(&status(&operation, 0, Status::Deployed, "done"))
                .await
        );

        let sent = fixture.sent_requests().await;
        let (message, request) = &sent[1];
        assert_eq!(message.session_id, firewall.id.to_string());
        assert_eq!(request.parameters["requested_by"], "ws one");
    }

    #[tokio::test]
    async fn test_advance_failure_is_recorded_on_next_step() {
        let fixture = Fixture::new().await;
        let (workspace, _, operation) = pipeline(&fixture).await;

        // The post step points at a resource that was never stored
        let mut operation_without_target = operation.clone();
        operation_without_target.steps[2].resource_id = Uuid::new_v4();
        operation_without_target.etag = fixture.repos.operations.get(operation.id).await.unwrap().etag;
        let operation = fixture.repos.operations.update(&operation_without_target).await.unwrap();

        let updater = updater(&fixture);
        updater
            .update_status_in_database(&status(&operation, 0, Status::Updated, "done"))
            .await;
        assert!(
            updater
                .update_status_in_database(&status(&operation, 1, Status::Deployed, "done"))
                .await
        );

        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.steps[2].status, Status::UpdatingFailed);
        assert!(stored.steps[2].message.contains("does not exist"));
        assert_eq!(stored.status, Status::DeploymentFailed);
        assert_eq!(fixture.sent_requests().await.len(), 2);

        // The main step succeeded, but the failed pipeline still fails the workspace
        let workspace = fixture.repos.resources.get(workspace.id).await.unwrap();
        assert_eq!(workspace.deployment_status, Status::DeploymentFailed);
    }

    #[tokio::test]
    async fn test_resource_conflict_leaves_step_open_for_redelivery() {
        let fixture = Fixture::new().await;
        let (_, firewall, operation) = pipeline(&fixture).await;

        let mut repos = fixture.repos.clone();
        repos.resources = ConflictingResources::wrap(fixture.repos.resources.clone(), 1);
        let updater = DeploymentStatusUpdater::new(repos, fixture.queue.clone());
        let done = status(&operation, 0, Status::Updated, "done");

        assert!(!updater.update_status_in_database(&done).await);
        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.steps[0].status, Status::AwaitingUpdate);
        assert_eq!(fixture.sent_requests().await.len(), 1);

        // The redelivered message applies in full
        assert!(updater.update_status_in_database(&done).await);
        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.steps[0].status, Status::Updated);
        assert_eq!(stored.status, Status::PipelineRunning);
        let firewall = fixture.repos.resources.get(firewall.id).await.unwrap();
        assert_eq!(firewall.deployment_status, Status::Updated);
        assert_eq!(fixture.sent_requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_queue_failure_while_advancing_is_recorded() {
        let mut fixture = Fixture::new().await;
        let (_, _, operation) = pipeline(&fixture).await;
        fixture.queue = RequestQueue::new(Arc::new(InMemoryBroker::new(["other"])), REQUEST_QUEUE);

        assert!(
            updater(&fixture)
                .update_status_in_database(&status(&operation, 0, Status::Updated, "done"))
                .await
        );

        let stored = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(stored.steps[1].status, Status::UpdatingFailed);
        assert_eq!(stored.status, Status::DeploymentFailed);
    }

    #[tokio::test]
    async fn test_redelivered_terminal_message_is_ignored() {
        let fixture = Fixture::new().await;
        let (_, _, operation) = pipeline(&fixture).await;
        let updater = updater(&fixture);
        let done = status(&operation, 0, Status::Updated, "done");

        assert!(updater.update_status_in_database(&done).await);
        let before = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(fixture.sent_requests().await.len(), 2);

        assert!(updater.update_status_in_database(&done).await);
        let after = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(fixture.sent_requests().await.len(), 2);

        // A late in-progress ping cannot move a finished step backwards either
        let late = status(&operation, 0, Status::Updating, "Job starting");
        assert!(updater.update_status_in_database(&late).await);
        let after = fixture.repos.operations.get(operation.id).await.unwrap();
        assert_eq!(after.steps[0].status, Status::Updated);
    }

    #[tokio::test]
    async fn test_unknown_step_is_not_completed() {
        let fixture = Fixture::new().await;
        let (_, _, operation) = pipeline(&fixture).await;

        let mut wrong_resource = status(&operation, 0, Status::Updated, "done");
        wrong_resource.id = Uuid::new_v4();
        assert!(!updater(&fixture).update_status_in_database(&wrong_resource).await);
    }

    #[tokio::test]
    async fn test_missing_operation_is_completed() {
        let fixture = Fixture::new().await;
        let message = DeploymentStatusUpdateMessage::new(Uuid::new_v4(), "main", Uuid::new_v4(), Status::Deployed, "");
        assert!(updater(&fixture).update_status_in_database(&message).await);
    }

    #[tokio::test]
    async fn test_malformed_message_is_abandoned() {
        let fixture = Fixture::new().await;
        let updater = updater(&fixture);
        assert!(!updater.process_message(b"{\"operationId\": 42}").await);

        let received = ReceivedMessage {
            body: b"not json".to_vec(),
            session_id: "s".to_string(),
            correlation_id: "c".to_string(),
            sequence_number: 1,
            delivery_count: 1,
        };
        assert_eq!(updater.handle(&received).await, Disposition::Abandon);
    }
}
