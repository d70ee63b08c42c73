//! Resource template domain types
//!
//! Only the parts of a template the control plane needs are modelled: its
//! identity and the pipelines it declares per action. Property schemas and
//! validation belong to the API layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::resource::ResourceType;
use crate::domain::status::RequestAction;

/// Step id reserved for the step that deploys the primary resource itself
pub const MAIN_STEP_ID: &str = "main";

/// A versioned resource template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    pub id: String,
    pub name: String,
    pub version: String,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Parent workspace service template name, set for user resource templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workspace_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Pipeline>,
}

impl ResourceTemplate {
    /// Steps declared for `action`, if the template defines a pipeline for it
    pub fn pipeline_steps(&self, action: &RequestAction) -> Option<&[PipelineStep]> {
        self.pipeline
            .as_ref()
            .and_then(|pipeline| pipeline.steps_for(action))
    }

    /// Looks up a single declared step by its template step id
    pub fn pipeline_step(&self, action: &RequestAction, step_id: &str) -> Option<&PipelineStep> {
        self.pipeline_steps(action)?
            .iter()
            .find(|step| step.step_id == step_id)
    }
}

/// Ordered steps per action name (`install`, `upgrade`, `uninstall` or a custom action)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline(pub HashMap<String, Vec<PipelineStep>>);

impl Pipeline {
    pub fn steps_for(&self, action: &RequestAction) -> Option<&[PipelineStep]> {
        self.0
            .get(action.as_str())
            .filter(|steps| !steps.is_empty())
            .map(Vec::as_slice)
    }
}

/// A step declared in a template pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub step_id: String,
    #[serde(default)]
    pub step_title: String,
    #[serde(default)]
    pub resource_template_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_action: Option<RequestAction>,
    #[serde(default)]
    pub properties: Vec<PipelineStepProperty>,
}

impl PipelineStep {
    pub fn is_main(&self) -> bool {
        self.step_id == MAIN_STEP_ID
    }
}

/// A property a pipeline step writes onto the resource it targets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStepProperty {
    pub name: String,
    #[serde(rename = "type", default = "default_property_type")]
    pub property_type: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_substitution_action: Option<ArraySubstitutionAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_match_field: Option<String>,
}

fn default_property_type() -> String {
    "string".to_string()
}

impl PipelineStepProperty {
    pub fn is_array(&self) -> bool {
        self.property_type == "array"
    }
}

/// How an array-typed step property combines with the array already stored on the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArraySubstitutionAction {
    Overwrite,
    Append,
    Remove,
    Replace,
}
