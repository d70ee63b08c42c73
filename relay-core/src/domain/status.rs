//! Status and action domain types
//!
//! `Status` is the closed set of states a resource, an operation step or a whole
//! operation can be in. `RequestAction` is the deployment action being run.
//! The mapping from (action, step outcome) to status lives here so that every
//! component derives statuses from the same table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment status of a resource, operation step or operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    NotDeployed,

    AwaitingDeployment,
    Deploying,
    Deployed,
    DeploymentFailed,

    AwaitingDeletion,
    Deleting,
    Deleted,
    DeletingFailed,

    AwaitingUpdate,
    Updating,
    Updated,
    UpdatingFailed,

    AwaitingAction,
    InvokingAction,
    ActionSucceeded,
    ActionFailed,

    PipelineRunning,
    PipelineFailed,
    PipelineSucceeded,
}

/// Coarse outcome of a single step, used as the input of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Awaiting,
    InProgress,
    Succeeded,
    Failed,
}

impl Status {
    /// Classifies the status into the outcome it represents
    ///
    /// `NotDeployed` and `PipelineRunning` carry no terminal meaning and are
    /// reported as awaiting / in progress respectively.
    pub fn outcome(self) -> StepOutcome {
        match self {
            Status::NotDeployed
            | Status::AwaitingDeployment
            | Status::AwaitingDeletion
            | Status::AwaitingUpdate
            | Status::AwaitingAction => StepOutcome::Awaiting,
            Status::Deploying
            | Status::Deleting
            | Status::Updating
            | Status::InvokingAction
            | Status::PipelineRunning => StepOutcome::InProgress,
            Status::Deployed
            | Status::Deleted
            | Status::Updated
            | Status::ActionSucceeded
            | Status::PipelineSucceeded => StepOutcome::Succeeded,
            Status::DeploymentFailed
            | Status::DeletingFailed
            | Status::UpdatingFailed
            | Status::ActionFailed
            | Status::PipelineFailed => StepOutcome::Failed,
        }
    }

    pub fn is_success(self) -> bool {
        self.outcome() == StepOutcome::Succeeded
    }

    pub fn is_failure(self) -> bool {
        self.outcome() == StepOutcome::Failed
    }

    /// True once no further status transition is expected for a step
    pub fn is_terminal(self) -> bool {
        matches!(self.outcome(), StepOutcome::Succeeded | StepOutcome::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::NotDeployed => "not_deployed",
            Status::AwaitingDeployment => "awaiting_deployment",
            Status::Deploying => "deploying",
            Status::Deployed => "deployed",
            Status::DeploymentFailed => "deployment_failed",
            Status::AwaitingDeletion => "awaiting_deletion",
            Status::Deleting => "deleting",
            Status::Deleted => "deleted",
            Status::DeletingFailed => "deleting_failed",
            Status::AwaitingUpdate => "awaiting_update",
            Status::Updating => "updating",
            Status::Updated => "updated",
            Status::UpdatingFailed => "updating_failed",
            Status::AwaitingAction => "awaiting_action",
            Status::InvokingAction => "invoking_action",
            Status::ActionSucceeded => "action_succeeded",
            Status::ActionFailed => "action_failed",
            Status::PipelineRunning => "pipeline_running",
            Status::PipelineFailed => "pipeline_failed",
            Status::PipelineSucceeded => "pipeline_succeeded",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action requested against a resource
///
/// Anything that is not one of the three built-in actions is a custom action
/// declared by the resource template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestAction {
    Install,
    Upgrade,
    Uninstall,
    Custom(String),
}

impl RequestAction {
    pub fn as_str(&self) -> &str {
        match self {
            RequestAction::Install => "install",
            RequestAction::Upgrade => "upgrade",
            RequestAction::Uninstall => "uninstall",
            RequestAction::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, RequestAction::Custom(_))
    }

    /// Transition table: the status a step running this action takes for a given outcome
    pub fn status_for(&self, outcome: StepOutcome) -> Status {
        use RequestAction::*;
        use StepOutcome::*;

        match (self, outcome) {
            (Install, Awaiting) => Status::AwaitingDeployment,
            (Install, InProgress) => Status::Deploying,
            (Install, Succeeded) => Status::Deployed,
            (Install, Failed) => Status::DeploymentFailed,

            (Uninstall, Awaiting) => Status::AwaitingDeletion,
            (Uninstall, InProgress) => Status::Deleting,
            (Uninstall, Succeeded) => Status::Deleted,
            (Uninstall, Failed) => Status::DeletingFailed,

            (Upgrade, Awaiting) => Status::AwaitingUpdate,
            (Upgrade, InProgress) => Status::Updating,
            (Upgrade, Succeeded) => Status::Updated,
            (Upgrade, Failed) => Status::UpdatingFailed,

            (Custom(_), Awaiting) => Status::AwaitingAction,
            (Custom(_), InProgress) => Status::InvokingAction,
            (Custom(_), Succeeded) => Status::ActionSucceeded,
            (Custom(_), Failed) => Status::ActionFailed,
        }
    }

    pub fn awaiting_status(&self) -> Status {
        self.status_for(StepOutcome::Awaiting)
    }

    pub fn in_progress_status(&self) -> Status {
        self.status_for(StepOutcome::InProgress)
    }

    pub fn success_status(&self) -> Status {
        self.status_for(StepOutcome::Succeeded)
    }

    pub fn failure_status(&self) -> Status {
        self.status_for(StepOutcome::Failed)
    }
}

/// Aggregate status of a multi-step operation after one of its steps changed
///
/// A failing step fails the whole pipeline with the status of the operation's
/// action. A succeeding last step completes it. Anything else keeps it running.
pub fn pipeline_status(action: &RequestAction, step_status: Status, is_last_step: bool) -> Status {
    match step_status.outcome() {
        StepOutcome::Failed => action.failure_status(),
        StepOutcome::Succeeded if is_last_step => action.success_status(),
        _ => Status::PipelineRunning,
    }
}

impl From<String> for RequestAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "install" => RequestAction::Install,
            "upgrade" => RequestAction::Upgrade,
            "uninstall" => RequestAction::Uninstall,
            _ => RequestAction::Custom(value),
        }
    }
}

impl From<&str> for RequestAction {
    fn from(value: &str) -> Self {
        RequestAction::from(value.to_string())
    }
}

impl From<RequestAction> for String {
    fn from(value: RequestAction) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for RequestAction {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RequestAction::from(s))
    }
}

impl fmt::Display for RequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
