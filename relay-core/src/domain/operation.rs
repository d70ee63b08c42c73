//! Operation domain types
//!
//! An `Operation` is the ledger entry for one pipeline execution. It is
//! created once by the request sender with all of its steps, and only the
//! deployment status updater mutates it afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::resource::{Resource, ResourceType};
use crate::domain::status::{RequestAction, Status, pipeline_status};
use crate::domain::template::{MAIN_STEP_ID, PipelineStep};
use crate::domain::user::User;

pub const PIPELINE_RUNNING_MESSAGE: &str = "Multi step pipeline running. See steps for details.";
pub const PIPELINE_SUCCEEDED_MESSAGE: &str = "Multi step pipeline completed successfully";

/// One pipeline execution against a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: Uuid,
    pub resource_id: Uuid,
    #[serde(default)]
    pub resource_path: String,
    #[serde(default)]
    pub resource_version: u32,
    pub action: RequestAction,
    pub user: User,
    pub status: Status,
    #[serde(default)]
    pub message: String,
    pub steps: Vec<OperationStep>,
    pub created_when: DateTime<Utc>,
    pub updated_when: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// One unit of work within an operation: one action against one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStep {
    /// Unique id of this step instance, carried as `stepId` on queue messages
    pub id: String,
    /// Id of the template pipeline step this was created from (`main` for the primary resource)
    pub template_step_id: String,
    #[serde(default)]
    pub step_title: String,
    pub resource_id: Uuid,
    pub resource_action: RequestAction,
    pub resource_template_name: String,
    pub resource_type: ResourceType,
    pub status: Status,
    #[serde(default)]
    pub message: String,
    pub updated_when: DateTime<Utc>,
    /// Resource whose template declared this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_resource_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_resource_template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_resource_template_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_resource_type: Option<ResourceType>,
    /// Resource the whole request was made on, when the step belongs to a cascade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_template_resource_id: Option<Uuid>,
}

impl OperationStep {
    /// Creates the step that runs `action` on the resource itself
    pub fn main(resource: &Resource, action: &RequestAction, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            template_step_id: MAIN_STEP_ID.to_string(),
            step_title: format!("Main step for {}", resource.id),
            resource_id: resource.id,
            resource_action: action.clone(),
            resource_template_name: resource.template_name.clone(),
            resource_type: resource.resource_type,
            status: action.awaiting_status(),
            message: message.into(),
            updated_when: Utc::now(),
            parent_resource_id: Some(resource.id),
            parent_resource_template_name: Some(resource.template_name.clone()),
            parent_resource_template_version: Some(resource.template_version.clone()),
            parent_resource_type: Some(resource.resource_type),
            source_template_resource_id: None,
        }
    }

    /// Creates a satellite step declared by `declaring`'s template, targeting `target`
    pub fn satellite(
        template_step: &PipelineStep,
        declaring: &Resource,
        target: &Resource,
        message: impl Into<String>,
    ) -> Self {
        let action = template_step
            .resource_action
            .clone()
            .unwrap_or(RequestAction::Upgrade);

        Self {
            id: Uuid::new_v4().to_string(),
            template_step_id: template_step.step_id.clone(),
            step_title: template_step.step_title.clone(),
            resource_id: target.id,
            status: action.awaiting_status(),
            resource_action: action,
            resource_template_name: target.template_name.clone(),
            resource_type: template_step.resource_type.unwrap_or(target.resource_type),
            message: message.into(),
            updated_when: Utc::now(),
            parent_resource_id: Some(declaring.id),
            parent_resource_template_name: Some(declaring.template_name.clone()),
            parent_resource_template_version: Some(declaring.template_version.clone()),
            parent_resource_type: Some(declaring.resource_type),
            source_template_resource_id: None,
        }
    }

    pub fn is_main(&self) -> bool {
        self.template_step_id == MAIN_STEP_ID
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

impl Operation {
    /// Creates a new operation with every step awaiting execution
    pub fn new(resource: &Resource, action: RequestAction, user: User, steps: Vec<OperationStep>) -> Self {
        let now = Utc::now();
        let status = action.awaiting_status();

        Self {
            id: Uuid::new_v4(),
            resource_id: resource.id,
            resource_path: resource.resource_path.clone(),
            resource_version: resource.resource_version,
            action,
            user,
            status,
            message: String::new(),
            steps,
            created_when: now,
            updated_when: now,
            etag: None,
        }
    }

    /// Index of the step matching both the step id and its target resource
    pub fn find_step(&self, step_id: &str, resource_id: Uuid) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step.id == step_id && step.resource_id == resource_id)
    }

    pub fn is_last_step(&self, index: usize) -> bool {
        index + 1 == self.steps.len()
    }

    /// The step deploying the resource the operation was requested on
    pub fn main_step(&self) -> Option<&OperationStep> {
        self.steps
            .iter()
            .find(|step| step.is_main() && step.resource_id == self.resource_id)
            .or_else(|| self.steps.iter().find(|step| step.is_main()))
    }

    /// Recomputes the headline status after the step at `index` changed
    ///
    /// Single step operations mirror the step verbatim. Multi step operations
    /// report the pipeline aggregate for the operation's action.
    pub fn update_overall_status(&mut self, index: usize) {
        self.updated_when = Utc::now();
        let is_last_step = self.is_last_step(index);
        let step = &self.steps[index];

        if self.steps.len() == 1 {
            self.status = step.status;
            self.message = step.message.clone();
            return;
        }

        let status = pipeline_status(&self.action, step.status, is_last_step);
        self.message = if step.is_failure() {
            format!("Multi step pipeline failed on step {}", step.template_step_id)
        } else if status == Status::PipelineRunning {
            PIPELINE_RUNNING_MESSAGE.to_string()
        } else {
            PIPELINE_SUCCEEDED_MESSAGE.to_string()
        };
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Resource {
        Resource::new(Uuid::new_v4(), ResourceType::Workspace, "tre-workspace-base", "0.1.0")
    }

    fn firewall() -> Resource {
        Resource::new(
            Uuid::new_v4(),
            ResourceType::SharedService,
            "tre-shared-service-firewall",
            "1.0.0",
        )
    }

    fn upgrade_step(id: &str) -> PipelineStep {
        PipelineStep {
            step_id: id.to_string(),
            step_title: format!("{} firewall", id),
            resource_template_name: "tre-shared-service-firewall".to_string(),
            resource_type: Some(ResourceType::SharedService),
            resource_action: Some(RequestAction::Upgrade),
            properties: vec![],
        }
    }

    fn three_step_operation() -> Operation {
        let ws = workspace();
        let fw = firewall();
        let steps = vec![
            OperationStep::satellite(&upgrade_step("pre"), &ws, &fw, ""),
            OperationStep::main(&ws, &RequestAction::Install, ""),
            OperationStep::satellite(&upgrade_step("post"), &ws, &fw, ""),
        ];
        Operation::new(&ws, RequestAction::Install, User::default(), steps)
    }

    #[test]
    fn test_new_operation_steps_are_awaiting() {
        let op = three_step_operation();
        assert_eq!(op.status, Status::AwaitingDeployment);
        assert_eq!(op.steps[0].status, Status::AwaitingUpdate);
        assert_eq!(op.steps[1].status, Status::AwaitingDeployment);
        assert_eq!(op.steps[2].status, Status::AwaitingUpdate);
        assert_eq!(op.main_step().unwrap().resource_id, op.resource_id);
    }

    #[test]
    fn test_find_step_requires_matching_resource() {
        let op = three_step_operation();
        let pre = &op.steps[0];
        assert_eq!(op.find_step(&pre.id, pre.resource_id), Some(0));
        assert_eq!(op.find_step(&pre.id, op.resource_id), None);
        assert!(op.is_last_step(2));
        assert!(!op.is_last_step(1));
    }

    #[test]
    fn test_single_step_operation_mirrors_step() {
        let ws = workspace();
        let step = OperationStep::main(&ws, &RequestAction::Install, "");
        let mut op = Operation::new(&ws, RequestAction::Install, User::default(), vec![step]);

        op.steps[0].status = Status::Deploying;
        op.steps[0].message = "Job starting".to_string();
        op.update_overall_status(0);

        assert_eq!(op.status, Status::Deploying);
        assert_eq!(op.message, "Job starting");
    }

    #[test]
    fn test_multi_step_operation_aggregates() {
        let mut op = three_step_operation();

        op.steps[0].status = Status::Updated;
        op.update_overall_status(0);
        assert_eq!(op.status, Status::PipelineRunning);
        assert_eq!(op.message, PIPELINE_RUNNING_MESSAGE);

        op.steps[1].status = Status::DeploymentFailed;
        op.update_overall_status(1);
        assert_eq!(op.status, Status::DeploymentFailed);
        assert_eq!(op.message, "Multi step pipeline failed on step main");
        assert_eq!(op.steps[2].status, Status::AwaitingUpdate);
    }

    #[test]
    fn test_multi_step_operation_completes_on_last_step() {
        let mut op = three_step_operation();
        op.steps[2].status = Status::Updated;
        op.update_overall_status(2);
        assert_eq!(op.status, Status::Deployed);
        assert_eq!(op.message, PIPELINE_SUCCEEDED_MESSAGE);
    }
}
