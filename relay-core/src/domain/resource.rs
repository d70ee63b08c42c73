//! Resource domain types
//!
//! Resources are owned by the external API; the control plane reads them,
//! mirrors deployment status onto them and merges deployment outputs into
//! their properties.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::domain::status::{RequestAction, Status};
use crate::domain::user::User;
use crate::dto::request::ResourceRequestMessage;

/// Kind of resource, which fixes its position in the resource hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Workspace,
    WorkspaceService,
    UserResource,
    SharedService,
}

impl ResourceType {
    /// How many ancestors a resource of this kind has
    ///
    /// Workspaces and shared services are top level, a workspace service lives
    /// in a workspace, a user resource lives in a workspace service.
    pub fn max_parent_depth(self) -> usize {
        match self {
            ResourceType::Workspace | ResourceType::SharedService => 0,
            ResourceType::WorkspaceService => 1,
            ResourceType::UserResource => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Workspace => "workspace",
            ResourceType::WorkspaceService => "workspace-service",
            ResourceType::UserResource => "user-resource",
            ResourceType::SharedService => "shared-service",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

/// A deployable resource document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: Uuid,
    pub template_name: String,
    pub template_version: String,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub deployment_status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub resource_path: String,
    #[serde(default)]
    pub resource_version: u32,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workspace_service_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_when: Option<DateTime<Utc>>,
}

impl Resource {
    /// Creates a resource with empty properties
    pub fn new(
        id: Uuid,
        resource_type: ResourceType,
        template_name: impl Into<String>,
        template_version: impl Into<String>,
    ) -> Self {
        Self {
            id,
            template_name: template_name.into(),
            template_version: template_version.into(),
            resource_type,
            properties: Map::new(),
            deployment_status: Status::NotDeployed,
            etag: None,
            resource_path: String::new(),
            resource_version: 0,
            is_enabled: true,
            workspace_id: None,
            parent_workspace_service_id: None,
            owner_id: None,
            user: None,
            updated_when: None,
        }
    }

    /// Immediate parent: the workspace of a workspace service, the workspace
    /// service of a user resource
    pub fn parent_id(&self) -> Option<Uuid> {
        match self.resource_type {
            ResourceType::WorkspaceService => self.workspace_id,
            ResourceType::UserResource => self.parent_workspace_service_id,
            ResourceType::Workspace | ResourceType::SharedService => None,
        }
    }

    /// Parent of the parent: only user resources have one (their workspace)
    pub fn grandparent_id(&self) -> Option<Uuid> {
        match self.resource_type {
            ResourceType::UserResource => self.workspace_id,
            _ => None,
        }
    }

    /// Builds the payload the resource processor needs to run `action` on this resource
    pub fn request_message(
        &self,
        operation_id: Uuid,
        step_id: &str,
        action: RequestAction,
    ) -> ResourceRequestMessage {
        ResourceRequestMessage {
            id: self.id,
            action,
            step_id: step_id.to_string(),
            operation_id,
            name: self.template_name.clone(),
            version: self.template_version.clone(),
            parameters: self.properties.clone(),
            workspace_id: self.workspace_id,
            parent_workspace_service_id: self.parent_workspace_service_id,
            owner_id: self.owner_id.clone(),
            is_enabled: self.is_enabled,
            user: self.user.clone(),
        }
    }
}
