//! Resource request DTOs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::ParseError;
use crate::domain::status::RequestAction;
use crate::domain::user::User;

/// Request for the resource processor to run one action against one resource
///
/// `id`, `action`, `stepId` and `operationId` are what the worker loop itself
/// needs. Everything else is payload for the deployment command builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequestMessage {
    pub id: Uuid,
    pub action: RequestAction,
    pub step_id: String,
    pub operation_id: Uuid,
    /// Bundle (template) name
    #[serde(default)]
    pub name: String,
    /// Bundle (template) version
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workspace_service_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

fn default_enabled() -> bool {
    true
}

impl ResourceRequestMessage {
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        serde_json::from_slice(body).map_err(|e| ParseError::new("resource request", e))
    }

    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Looks up a top level field of the message by its wire (camelCase) name
    pub fn field(&self, name: &str) -> Option<Value> {
        serde_json::to_value(self)
            .ok()?
            .as_object_mut()?
            .remove(name)
            .filter(|value| !value.is_null())
    }
}
