//! Resource History Repository
//!
//! Append-only: one entry per resource version that was replaced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::domain::resource::Resource;
use relay_core::domain::user::User;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::RepositoryError;

/// Snapshot of a resource before it was patched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHistoryItem {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub resource_version: u32,
    pub template_version: String,
    pub properties: Map<String, Value>,
    pub is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub updated_when: DateTime<Utc>,
}

impl ResourceHistoryItem {
    pub fn snapshot(resource: &Resource) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: resource.id,
            resource_version: resource.resource_version,
            template_version: resource.template_version.clone(),
            properties: resource.properties.clone(),
            is_enabled: resource.is_enabled,
            user: resource.user.clone(),
            updated_when: resource.updated_when.unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait]
pub trait ResourceHistoryRepository: Send + Sync {
    async fn append(&self, item: &ResourceHistoryItem) -> Result<(), RepositoryError>;

    /// History of a resource, oldest version first
    async fn list(&self, resource_id: Uuid) -> Result<Vec<ResourceHistoryItem>, RepositoryError>;
}

pub struct PgResourceHistoryRepository {
    pool: PgPool,
}

impl PgResourceHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceHistoryRepository for PgResourceHistoryRepository {
    async fn append(&self, item: &ResourceHistoryItem) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO resource_history (id, resource_id, resource_version, created_at, document)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(item.id)
        .bind(item.resource_id)
        .bind(item.resource_version as i32)
        .bind(item.updated_when)
        .bind(Json(item))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, resource_id: Uuid) -> Result<Vec<ResourceHistoryItem>, RepositoryError> {
        let rows: Vec<(Json<ResourceHistoryItem>,)> = sqlx::query_as(
            r#"
            SELECT document
            FROM resource_history
            WHERE resource_id = $1
            ORDER BY resource_version ASC
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(document,)| document.0).collect())
    }
}
