//! Resource Request Sender
//!
//! Starts an operation: builds its steps from the resource template's
//! pipeline for the action, persists it and sends the first step to the
//! resource processor. Later steps are sent by the status updater as each
//! previous step completes.

use relay_core::domain::operation::{Operation, OperationStep};
use relay_core::domain::resource::Resource;
use relay_core::domain::status::RequestAction;
use relay_core::domain::user::User;
use thiserror::Error;
use tracing::{Instrument, info, info_span};

use crate::repository::{RepositoryError, Repositories};
use crate::service::queue::{QueueError, RequestQueue};
use crate::service::step::{StepError, update_resource_for_step};

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("failed to send resource request: {0}")]
    Queue(#[from] QueueError),
}

pub struct ResourceRequestSender {
    repos: Repositories,
    queue: RequestQueue,
}

impl ResourceRequestSender {
    pub fn new(repos: Repositories, queue: RequestQueue) -> Self {
        Self { repos, queue }
    }

    /// Creates the operation for `action` on `resource` and sends its first step
    ///
    /// With `is_cascade`, the operation also covers every resource depending on
    /// `resource`, children first. Nothing is retried here: the caller sees
    /// any persistence or send failure.
    pub async fn send(
        &self,
        resource: &Resource,
        action: RequestAction,
        user: User,
        is_cascade: bool,
    ) -> Result<Operation, SendError> {
        let span = info_span!("send_resource_request", resource_id = %resource.id, %action);

        async {
            let resources = if is_cascade {
                self.repos.resources.dependency_list(resource).await?
            } else {
                vec![resource.clone()]
            };

            let mut steps = Vec::new();
            for target in &resources {
                let mut target_steps = self.build_steps(target, &action).await?;
                if is_cascade {
                    for step in &mut target_steps {
                        step.source_template_resource_id = Some(resource.id);
                    }
                }
                steps.extend(target_steps);
            }

            let operation = Operation::new(resource, action.clone(), user, steps);
            let operation = self.repos.operations.create(&operation).await?;
            info!(
                "Created operation {} with {} step(s)",
                operation.id,
                operation.steps.len()
            );

            // Steps are never empty: every resource contributes at least a main step
            let Some(first_step) = operation.steps.first() else {
                return Ok(operation);
            };
            let resource_to_send = update_resource_for_step(
                &self.repos,
                first_step,
                &action,
                Some(resource),
                &operation.user,
            )
            .await?;

            let request = resource_to_send.request_message(
                operation.id,
                &first_step.id,
                first_step.resource_action.clone(),
            );
            self.queue.send(&request).await?;

            Ok(operation)
        }
        .instrument(span)
        .await
    }

    /// Steps for one resource: its template's pipeline for `action`, or a
    /// single main step when the template declares none
    async fn build_steps(&self, resource: &Resource, action: &RequestAction) -> Result<Vec<OperationStep>, SendError> {
        let template = self
            .repos
            .templates
            .get_current(&resource.template_name, resource.resource_type)
            .await?;

        let Some(pipeline_steps) = template.pipeline_steps(action) else {
            return Ok(vec![OperationStep::main(resource, action, "")]);
        };

        let mut steps = Vec::with_capacity(pipeline_steps.len());
        for pipeline_step in pipeline_steps {
            if pipeline_step.is_main() {
                steps.push(OperationStep::main(resource, action, ""));
            } else {
                let target = self
                    .repos
                    .resources
                    .get_by_template_name(&pipeline_step.resource_template_name)
                    .await?;
                steps.push(OperationStep::satellite(pipeline_step, resource, &target, ""));
            }
        }

        Ok(steps)
    }
}
