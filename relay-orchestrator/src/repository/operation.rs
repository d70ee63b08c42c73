//! Operation Repository

use async_trait::async_trait;
use relay_core::domain::operation::Operation;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{RepositoryError, new_etag};

const ENTITY: &str = "operation";

#[async_trait]
pub trait OperationRepository: Send + Sync {
    async fn create(&self, operation: &Operation) -> Result<Operation, RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Operation, RepositoryError>;

    /// Operations run against a resource, newest first
    async fn list_by_resource(&self, resource_id: Uuid) -> Result<Vec<Operation>, RepositoryError>;

    /// Writes `operation` if its etag is still current, returning it with its new etag
    async fn update(&self, operation: &Operation) -> Result<Operation, RepositoryError>;
}

pub struct PgOperationRepository {
    pool: PgPool,
}

impl PgOperationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OperationRepository for PgOperationRepository {
    async fn create(&self, operation: &Operation) -> Result<Operation, RepositoryError> {
        let mut created = operation.clone();
        created.etag = Some(new_etag());

        sqlx::query(
            r#"
            INSERT INTO operations (id, resource_id, etag, created_at, document)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(created.id)
        .bind(created.resource_id)
        .bind(created.etag.as_deref())
        .bind(created.created_when)
        .bind(Json(&created))
        .execute(&self.pool)
        .await?;

        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Operation, RepositoryError> {
        let row = sqlx::query_as::<_, OperationRow>("SELECT document, etag FROM operations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id))?;

        Ok(row.into())
    }

    async fn list_by_resource(&self, resource_id: Uuid) -> Result<Vec<Operation>, RepositoryError> {
        let rows = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT document, etag
            FROM operations
            WHERE resource_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn update(&self, operation: &Operation) -> Result<Operation, RepositoryError> {
        let mut updated = operation.clone();
        updated.etag = Some(new_etag());

        let result = sqlx::query(
            r#"
            UPDATE operations
            SET document = $1, etag = $2
            WHERE id = $3 AND ($4::TEXT IS NULL OR etag = $4)
            "#,
        )
        .bind(Json(&updated))
        .bind(updated.etag.as_deref())
        .bind(updated.id)
        .bind(operation.etag.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.get(operation.id).await?;
            return Err(RepositoryError::conflict(ENTITY, operation.id));
        }

        Ok(updated)
    }
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    document: Json<Operation>,
    etag: String,
}

impl From<OperationRow> for Operation {
    fn from(row: OperationRow) -> Self {
        let mut operation = row.document.0;
        operation.etag = Some(row.etag);
        operation
    }
}
