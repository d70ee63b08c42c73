//! In-memory repositories
//!
//! One store implements every repository trait with the same etag semantics
//! as the Postgres implementations. Used by tests and by local runs without a
//! database.

use async_trait::async_trait;
use relay_core::domain::operation::Operation;
use relay_core::domain::resource::{Resource, ResourceType};
use relay_core::domain::status::Status;
use relay_core::domain::template::ResourceTemplate;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    OperationRepository, RepositoryError, ResourceHistoryItem, ResourceHistoryRepository,
    ResourceRepository, ResourceTemplateRepository, new_etag,
};

#[derive(Default)]
struct State {
    // Ordered by id so lookups are deterministic, like the ORDER BY of the SQL queries
    resources: BTreeMap<Uuid, Resource>,
    operations: HashMap<Uuid, Operation>,
    templates: HashMap<String, ResourceTemplate>,
    history: Vec<ResourceHistoryItem>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(resource: &Resource) -> bool {
    resource.deployment_status != Status::Deleted
}

fn children(state: &State, resource_type: ResourceType, is_child: impl Fn(&Resource) -> bool) -> Vec<Resource> {
    state
        .resources
        .values()
        .filter(|r| r.resource_type == resource_type && is_live(r) && is_child(r))
        .cloned()
        .collect()
}

#[async_trait]
impl ResourceRepository for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Resource, RepositoryError> {
        let state = self.state.lock().await;
        state
            .resources
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("resource", id))
    }

    async fn get_by_template_name(&self, template_name: &str) -> Result<Resource, RepositoryError> {
        let state = self.state.lock().await;
        state
            .resources
            .values()
            .find(|r| r.template_name == template_name && is_live(r))
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("resource", template_name))
    }

    async fn dependency_list(&self, resource: &Resource) -> Result<Vec<Resource>, RepositoryError> {
        let state = self.state.lock().await;
        let id = Some(resource.id);

        let mut resources = match resource.resource_type {
            ResourceType::Workspace => {
                let mut list = children(&state, ResourceType::UserResource, |r| r.workspace_id == id);
                list.extend(children(&state, ResourceType::WorkspaceService, |r| r.workspace_id == id));
                list
            }
            ResourceType::WorkspaceService => {
                children(&state, ResourceType::UserResource, |r| r.parent_workspace_service_id == id)
            }
            ResourceType::UserResource | ResourceType::SharedService => Vec::new(),
        };

        resources.push(resource.clone());
        Ok(resources)
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, RepositoryError> {
        let mut created = resource.clone();
        created.etag = Some(new_etag());
        self.state
            .lock()
            .await
            .resources
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, resource: &Resource) -> Result<Resource, RepositoryError> {
        let mut state = self.state.lock().await;
        let stored = state
            .resources
            .get_mut(&resource.id)
            .ok_or_else(|| RepositoryError::not_found("resource", resource.id))?;

        if resource.etag.is_some() && resource.etag != stored.etag {
            return Err(RepositoryError::conflict("resource", resource.id));
        }

        let mut updated = resource.clone();
        updated.etag = Some(new_etag());
        *stored = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl OperationRepository for InMemoryStore {
    async fn create(&self, operation: &Operation) -> Result<Operation, RepositoryError> {
        let mut created = operation.clone();
        created.etag = Some(new_etag());
        self.state
            .lock()
            .await
            .operations
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Operation, RepositoryError> {
        let state = self.state.lock().await;
        state
            .operations
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("operation", id))
    }

    async fn list_by_resource(&self, resource_id: Uuid) -> Result<Vec<Operation>, RepositoryError> {
        let state = self.state.lock().await;
        let mut operations: Vec<Operation> = state
            .operations
            .values()
            .filter(|o| o.resource_id == resource_id)
            .cloned()
            .collect();
        operations.sort_by(|a, b| b.created_when.cmp(&a.created_when));
        Ok(operations)
    }

    async fn update(&self, operation: &Operation) -> Result<Operation, RepositoryError> {
        let mut state = self.state.lock().await;
        let stored = state
            .operations
            .get_mut(&operation.id)
            .ok_or_else(|| RepositoryError::not_found("operation", operation.id))?;

        if operation.etag.is_some() && operation.etag != stored.etag {
            return Err(RepositoryError::conflict("operation", operation.id));
        }

        let mut updated = operation.clone();
        updated.etag = Some(new_etag());
        *stored = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl ResourceTemplateRepository for InMemoryStore {
    async fn get_current(
        &self,
        name: &str,
        resource_type: ResourceType,
    ) -> Result<ResourceTemplate, RepositoryError> {
        let state = self.state.lock().await;
        state
            .templates
            .values()
            .find(|t| t.name == name && t.resource_type == resource_type && t.current)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("resource template", format!("{} ({})", name, resource_type)))
    }

    async fn upsert(&self, template: &ResourceTemplate) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if template.current {
            for other in state.templates.values_mut() {
                if other.name == template.name && other.resource_type == template.resource_type {
                    other.current = false;
                }
            }
        }
        state.templates.insert(template.id.clone(), template.clone());
        Ok(())
    }
}

#[async_trait]
impl ResourceHistoryRepository for InMemoryStore {
    async fn append(&self, item: &ResourceHistoryItem) -> Result<(), RepositoryError> {
        self.state.lock().await.history.push(item.clone());
        Ok(())
    }

    async fn list(&self, resource_id: Uuid) -> Result<Vec<ResourceHistoryItem>, RepositoryError> {
        let state = self.state.lock().await;
        let mut items: Vec<ResourceHistoryItem> = state
            .history
            .iter()
            .filter(|h| h.resource_id == resource_id)
            .cloned()
            .collect();
        items.sort_by_key(|h| h.resource_version);
        Ok(items)
    }
}
