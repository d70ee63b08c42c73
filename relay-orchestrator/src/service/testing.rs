//! Fixtures shared by the service tests

use async_trait::async_trait;
use relay_bus::{InMemoryBroker, ReceivedMessage};
use relay_core::domain::resource::{Resource, ResourceType};
use relay_core::domain::status::RequestAction;
use relay_core::domain::template::{
    ArraySubstitutionAction, MAIN_STEP_ID, Pipeline, PipelineStep, PipelineStepProperty, ResourceTemplate,
};
use relay_core::dto::request::ResourceRequestMessage;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::repository::{InMemoryStore, Repositories, RepositoryError, ResourceRepository};
use crate::service::RequestQueue;

pub(crate) const REQUEST_QUEUE: &str = "resource-request";
pub(crate) const STATUS_QUEUE: &str = "deployment-status-update";

pub(crate) const WORKSPACE_TEMPLATE: &str = "tre-workspace-base";
pub(crate) const SERVICE_TEMPLATE: &str = "tre-service-guacamole";
pub(crate) const USER_RESOURCE_TEMPLATE: &str = "tre-user-vm";
pub(crate) const FIREWALL_TEMPLATE: &str = "tre-shared-service-firewall";

/// Fails the first `conflicts` resource updates with a stale etag
pub(crate) struct ConflictingResources {
    inner: Arc<dyn ResourceRepository>,
    conflicts: AtomicUsize,
}

impl ConflictingResources {
    pub fn wrap(inner: Arc<dyn ResourceRepository>, conflicts: usize) -> Arc<dyn ResourceRepository> {
        Arc::new(Self {
            inner,
            conflicts: AtomicUsize::new(conflicts),
        })
    }
}

#[async_trait]
impl ResourceRepository for ConflictingResources {
    async fn get(&self, id: Uuid) -> Result<Resource, RepositoryError> {
        self.inner.get(id).await
    }

    async fn get_by_template_name(&self, name: &str) -> Result<Resource, RepositoryError> {
        self.inner.get_by_template_name(name).await
    }

    async fn dependency_list(&self, resource: &Resource) -> Result<Vec<Resource>, RepositoryError> {
        self.inner.dependency_list(resource).await
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, RepositoryError> {
        self.inner.create(resource).await
    }

    async fn update(&self, resource: &Resource) -> Result<Resource, RepositoryError> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::conflict("resource", resource.id));
        }
        self.inner.update(resource).await
    }
}

pub(crate) struct Fixture {
    pub repos: Repositories,
    pub broker: InMemoryBroker,
    pub queue: RequestQueue,
}

impl Fixture {
    /// In-memory stores seeded with the templates used across the tests
    pub async fn new() -> Self {
        let repos = Repositories::in_memory(InMemoryStore::new());
        let broker = InMemoryBroker::new([REQUEST_QUEUE, STATUS_QUEUE]);
        let queue = RequestQueue::new(Arc::new(broker.clone()), REQUEST_QUEUE);

        for template in [
            workspace_template(),
            service_template(),
            template(USER_RESOURCE_TEMPLATE, ResourceType::UserResource, None),
            template(FIREWALL_TEMPLATE, ResourceType::SharedService, None),
        ] {
            repos.templates.upsert(&template).await.unwrap();
        }

        Self { repos, broker, queue }
    }

    pub async fn seed(&self, resource: Resource) -> Resource {
        self.repos.resources.create(&resource).await.unwrap()
    }

    pub async fn workspace(&self, display_name: &str) -> Resource {
        let mut workspace = Resource::new(Uuid::new_v4(), ResourceType::Workspace, WORKSPACE_TEMPLATE, "0.1.0");
        workspace
            .properties
            .insert("display_name".to_string(), json!(display_name));
        self.seed(workspace).await
    }

    pub async fn service(&self, workspace: &Resource, display_name: &str) -> Resource {
        let mut service = Resource::new(Uuid::new_v4(), ResourceType::WorkspaceService, SERVICE_TEMPLATE, "0.2.0");
        service.workspace_id = Some(workspace.id);
        service
            .properties
            .insert("display_name".to_string(), json!(display_name));
        self.seed(service).await
    }

    pub async fn user_resource(&self, service: &Resource) -> Resource {
        let mut vm = Resource::new(Uuid::new_v4(), ResourceType::UserResource, USER_RESOURCE_TEMPLATE, "1.0.0");
        vm.workspace_id = service.workspace_id;
        vm.parent_workspace_service_id = Some(service.id);
        self.seed(vm).await
    }

    /// Requests waiting on the request queue, oldest first
    pub async fn sent_requests(&self) -> Vec<(ReceivedMessage, ResourceRequestMessage)> {
        self.broker
            .pending_messages(REQUEST_QUEUE)
            .await
            .unwrap()
            .into_iter()
            .map(|m| {
                let request = ResourceRequestMessage::parse(&m.body).unwrap();
                (m, request)
            })
            .collect()
    }
}

pub(crate) fn firewall() -> Resource {
    let mut firewall = Resource::new(Uuid::new_v4(), ResourceType::SharedService, FIREWALL_TEMPLATE, "1.0.0");
    firewall
        .properties
        .insert("rule_collections".to_string(), json!([]));
    firewall
}

fn property(name: &str, value: serde_json::Value) -> PipelineStepProperty {
    PipelineStepProperty {
        name: name.to_string(),
        property_type: "string".to_string(),
        value,
        array_substitution_action: None,
        array_match_field: None,
    }
}

/// Upgrade of the firewall recording who asked and a rule collection per requester
pub(crate) fn firewall_step(step_id: &str) -> PipelineStep {
    PipelineStep {
        step_id: step_id.to_string(),
        step_title: format!("Update firewall ({})", step_id),
        resource_template_name: FIREWALL_TEMPLATE.to_string(),
        resource_type: Some(ResourceType::SharedService),
        resource_action: Some(RequestAction::Upgrade),
        properties: vec![
            property("requested_by", json!("{{ resource.properties.display_name }}")),
            PipelineStepProperty {
                property_type: "array".to_string(),
                array_substitution_action: Some(ArraySubstitutionAction::Replace),
                array_match_field: Some("name".to_string()),
                ..property(
                    "rule_collections",
                    json!({ "name": "arc_{{ resource.id }}", "source": "{{ resource.properties.display_name }}" }),
                )
            },
        ],
    }
}

fn main_step() -> PipelineStep {
    PipelineStep {
        step_id: MAIN_STEP_ID.to_string(),
        ..Default::default()
    }
}

fn template(name: &str, resource_type: ResourceType, pipeline: Option<Pipeline>) -> ResourceTemplate {
    ResourceTemplate {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        version: "0.1.0".to_string(),
        resource_type,
        current: true,
        title: name.to_string(),
        description: String::new(),
        parent_workspace_service: None,
        pipeline,
    }
}

/// Workspace template: install runs [pre, main, post] against the firewall
pub(crate) fn workspace_template() -> ResourceTemplate {
    let pipeline = Pipeline(HashMap::from([(
        "install".to_string(),
        vec![firewall_step("pre"), main_step(), firewall_step("post")],
    )]));
    template(WORKSPACE_TEMPLATE, ResourceType::Workspace, Some(pipeline))
}

/// Workspace service template: install runs [main, post], the post step
/// naming the service's workspace
pub(crate) fn service_template() -> ResourceTemplate {
    let mut post = firewall_step("post");
    post.properties = vec![property(
        "requested_by",
        json!("{{ resource.parent.properties.display_name }}"),
    )];

    let pipeline = Pipeline(HashMap::from([("install".to_string(), vec![main_step(), post])]));
    template(SERVICE_TEMPLATE, ResourceType::WorkspaceService, Some(pipeline))
}
