//! Resource Repository
//!
//! Resources are owned by the external API. The control plane reads them,
//! writes their deployment status and merges properties into them.

use async_trait::async_trait;
use relay_core::domain::resource::{Resource, ResourceType};
use relay_core::domain::status::Status;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{RepositoryError, new_etag};

const ENTITY: &str = "resource";

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Resource, RepositoryError>;

    /// The live resource deployed from `template_name`, used to find the
    /// shared service a pipeline step targets
    async fn get_by_template_name(&self, template_name: &str) -> Result<Resource, RepositoryError>;

    /// Live resources an action on `resource` cascades to, children before
    /// their parents, ending with `resource` itself
    async fn dependency_list(&self, resource: &Resource) -> Result<Vec<Resource>, RepositoryError>;

    async fn create(&self, resource: &Resource) -> Result<Resource, RepositoryError>;

    /// Writes `resource` if its etag is still current, returning it with its new etag
    async fn update(&self, resource: &Resource) -> Result<Resource, RepositoryError>;
}

pub struct PgResourceRepository {
    pool: PgPool,
}

impl PgResourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_children(
        &self,
        column: &str,
        parent_id: Uuid,
        resource_type: ResourceType,
    ) -> Result<Vec<Resource>, RepositoryError> {
        let query = format!(
            r#"
            SELECT document, etag
            FROM resources
            WHERE {} = $1 AND resource_type = $2
              AND document->>'deploymentStatus' IS DISTINCT FROM $3
            ORDER BY id
            "#,
            column
        );

        let rows = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(parent_id)
            .bind(resource_type.as_str())
            .bind(Status::Deleted.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Resource::from).collect())
    }
}

#[async_trait]
impl ResourceRepository for PgResourceRepository {
    async fn get(&self, id: Uuid) -> Result<Resource, RepositoryError> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT document, etag FROM resources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))?;

        Ok(row.into())
    }

    async fn get_by_template_name(&self, template_name: &str) -> Result<Resource, RepositoryError> {
        let row = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT document, etag
            FROM resources
            WHERE template_name = $1
              AND document->>'deploymentStatus' IS DISTINCT FROM $2
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(template_name)
        .bind(Status::Deleted.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::not_found(ENTITY, template_name))?;

        Ok(row.into())
    }

    async fn dependency_list(&self, resource: &Resource) -> Result<Vec<Resource>, RepositoryError> {
        let mut resources = match resource.resource_type {
            ResourceType::Workspace => {
                let mut children = self
                    .find_children("workspace_id", resource.id, ResourceType::UserResource)
                    .await?;
                children.extend(
                    self.find_children("workspace_id", resource.id, ResourceType::WorkspaceService)
                        .await?,
                );
                children
            }
            ResourceType::WorkspaceService => {
                self.find_children("parent_workspace_service_id", resource.id, ResourceType::UserResource)
                    .await?
            }
            ResourceType::UserResource | ResourceType::SharedService => Vec::new(),
        };

        resources.push(resource.clone());
        Ok(resources)
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, RepositoryError> {
        let mut created = resource.clone();
        created.etag = Some(new_etag());

        sqlx::query(
            r#"
            INSERT INTO resources (id, template_name, resource_type, workspace_id,
                                   parent_workspace_service_id, etag, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(created.id)
        .bind(&created.template_name)
        .bind(created.resource_type.as_str())
        .bind(created.workspace_id)
        .bind(created.parent_workspace_service_id)
        .bind(created.etag.as_deref())
        .bind(Json(&created))
        .execute(&self.pool)
        .await?;

        Ok(created)
    }

    async fn update(&self, resource: &Resource) -> Result<Resource, RepositoryError> {
        let mut updated = resource.clone();
        updated.etag = Some(new_etag());

        let result = sqlx::query(
            r#"
            UPDATE resources
            SET document = $1, etag = $2, template_name = $3
            WHERE id = $4 AND ($5::TEXT IS NULL OR etag = $5)
            "#,
        )
        .bind(Json(&updated))
        .bind(updated.etag.as_deref())
        .bind(&updated.template_name)
        .bind(updated.id)
        .bind(resource.etag.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a stale etag from a missing row
            self.get(resource.id).await?;
            return Err(RepositoryError::conflict(ENTITY, resource.id));
        }

        Ok(updated)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ResourceRow {
    document: Json<Resource>,
    etag: String,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        let mut resource = row.document.0;
        resource.etag = Some(row.etag);
        resource
    }
}
