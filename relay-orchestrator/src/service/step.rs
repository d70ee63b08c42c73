//! Pipeline step resources
//!
//! Works out which resource document a step sends to the resource processor.
//! The main step sends the resource the operation was requested on. Any other
//! step first patches its target resource with the properties the declaring
//! template computes for it.

use chrono::Utc;
use relay_core::domain::operation::OperationStep;
use relay_core::domain::resource::Resource;
use relay_core::domain::status::RequestAction;
use relay_core::domain::template::PipelineStep;
use relay_core::domain::user::User;
use relay_core::substitution::{ResourceContext, SubstitutionError, substitute_properties};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::repository::{RepositoryError, Repositories, ResourceHistoryItem, ResourceRepository};

/// Attempts after the first one when a patch hits a stale etag
const PATCH_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("substitution failed: {0}")]
    Substitution(#[from] SubstitutionError),

    #[error("cannot find step with id of {step_id} in template {template_name} for action {action}")]
    TemplateStepNotFound {
        step_id: String,
        template_name: String,
        action: RequestAction,
    },

    #[error("step {0} has no parent resource")]
    MissingParentResource(String),

    #[error("only upgrade is supported for pipeline steps, step {step_id} requests {action}")]
    UnsupportedAction { step_id: String, action: RequestAction },
}

/// Builds the substitution context for `primary`: the resource and its
/// ancestors as currently stored
pub async fn resource_context(
    resources: &dyn ResourceRepository,
    primary: &Resource,
) -> Result<ResourceContext, RepositoryError> {
    let mut context = ResourceContext::new(primary);

    if let Some(parent_id) = primary.parent_id() {
        context = context.with_parent(&resources.get(parent_id).await?);
    }
    if let Some(grandparent_id) = primary.grandparent_id() {
        context = context.with_grandparent(&resources.get(grandparent_id).await?);
    }

    Ok(context)
}

/// Returns the resource `step` deploys, patching it first for non-main steps
///
/// `root_resource` is the resource the caller already holds, if any; it is
/// used instead of a store read when the step refers to it. `primary_action`
/// is the operation's action, which selects the declaring template's pipeline.
pub async fn update_resource_for_step(
    repos: &Repositories,
    step: &OperationStep,
    primary_action: &RequestAction,
    root_resource: Option<&Resource>,
    user: &User,
) -> Result<Resource, StepError> {
    let held = |id: Uuid| root_resource.filter(|r| r.id == id).cloned();

    if step.is_main() {
        return match held(step.resource_id) {
            Some(resource) => Ok(resource),
            None => Ok(repos.resources.get(step.resource_id).await?),
        };
    }

    if step.resource_action != RequestAction::Upgrade {
        return Err(StepError::UnsupportedAction {
            step_id: step.template_step_id.clone(),
            action: step.resource_action.clone(),
        });
    }

    let parent_id = step
        .parent_resource_id
        .ok_or_else(|| StepError::MissingParentResource(step.id.clone()))?;
    let primary = match held(parent_id) {
        Some(resource) => resource,
        None => repos.resources.get(parent_id).await?,
    };

    let template = repos
        .templates
        .get_current(&primary.template_name, primary.resource_type)
        .await?;
    let template_step = template
        .pipeline_step(primary_action, &step.template_step_id)
        .ok_or_else(|| StepError::TemplateStepNotFound {
            step_id: step.template_step_id.clone(),
            template_name: primary.template_name.clone(),
            action: primary_action.clone(),
        })?;

    let context = resource_context(repos.resources.as_ref(), &primary).await?;
    patch_with_retries(repos, step.resource_id, template_step, &context, user).await
}

async fn patch_with_retries(
    repos: &Repositories,
    resource_id: Uuid,
    template_step: &PipelineStep,
    context: &ResourceContext,
    user: &User,
) -> Result<Resource, StepError> {
    let mut attempt = 0;

    loop {
        // Substitute against a fresh read so array actions see the stored array
        let target = repos.resources.get(resource_id).await?;
        let properties = substitute_properties(template_step, context, &target)?;

        match patch_resource(repos, target, properties, user).await {
            Err(e) if e.is_conflict() && attempt < PATCH_RETRIES => {
                attempt += 1;
                warn!("Etag mismatch for {}. Retrying ({}/{}).", resource_id, attempt, PATCH_RETRIES);
            }
            result => return Ok(result?),
        }
    }
}

/// Merges `properties` into `resource`, bumps its version and records the
/// replaced version in the history
pub async fn patch_resource(
    repos: &Repositories,
    mut resource: Resource,
    properties: Map<String, Value>,
    user: &User,
) -> Result<Resource, RepositoryError> {
    let previous = ResourceHistoryItem::snapshot(&resource);

    resource.properties.extend(properties);
    resource.resource_version += 1;
    resource.user = Some(user.clone());
    resource.updated_when = Some(Utc::now());

    let updated = repos.resources.update(&resource).await?;
    repos.history.append(&previous).await?;

    debug!("Patched resource {} to version {}", updated.id, updated.resource_version);
    Ok(updated)
}
