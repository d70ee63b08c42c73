//! Resource Template Repository

use async_trait::async_trait;
use relay_core::domain::resource::ResourceType;
use relay_core::domain::template::ResourceTemplate;
use sqlx::PgPool;
use sqlx::types::Json;

use super::RepositoryError;

const ENTITY: &str = "resource template";

#[async_trait]
pub trait ResourceTemplateRepository: Send + Sync {
    /// The version of `name` currently marked as current
    async fn get_current(
        &self,
        name: &str,
        resource_type: ResourceType,
    ) -> Result<ResourceTemplate, RepositoryError>;

    /// Registers a template version; a current template demotes the previous current one
    async fn upsert(&self, template: &ResourceTemplate) -> Result<(), RepositoryError>;
}

pub struct PgResourceTemplateRepository {
    pool: PgPool,
}

impl PgResourceTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceTemplateRepository for PgResourceTemplateRepository {
    async fn get_current(
        &self,
        name: &str,
        resource_type: ResourceType,
    ) -> Result<ResourceTemplate, RepositoryError> {
        let row: Option<(Json<ResourceTemplate>,)> = sqlx::query_as(
            r#"
            SELECT document
            FROM resource_templates
            WHERE name = $1 AND resource_type = $2 AND current
            "#,
        )
        .bind(name)
        .bind(resource_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(document,)| document.0)
            .ok_or_else(|| RepositoryError::not_found(ENTITY, format!("{} ({})", name, resource_type)))
    }

    async fn upsert(&self, template: &ResourceTemplate) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if template.current {
            sqlx::query(
                r#"
                UPDATE resource_templates
                SET current = FALSE, document = jsonb_set(document, '{current}', 'false')
                WHERE name = $1 AND resource_type = $2 AND id <> $3
                "#,
            )
            .bind(&template.name)
            .bind(template.resource_type.as_str())
            .bind(&template.id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO resource_templates (id, name, version, resource_type, current, document)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                version = EXCLUDED.version,
                current = EXCLUDED.current,
                document = EXCLUDED.document
            "#,
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(&template.version)
        .bind(template.resource_type.as_str())
        .bind(template.current)
        .bind(Json(template))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
