use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Creates the document tables and their lookup indexes
///
/// Each table keeps the full document as JSONB next to the columns queries
/// filter on.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id UUID PRIMARY KEY,
            template_name VARCHAR(255) NOT NULL,
            resource_type VARCHAR(50) NOT NULL,
            workspace_id UUID,
            parent_workspace_service_id UUID,
            etag TEXT,
            document JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS operations (
            id UUID PRIMARY KEY,
            resource_id UUID NOT NULL,
            etag TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            document JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resource_templates (
            id TEXT PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            version VARCHAR(50) NOT NULL,
            resource_type VARCHAR(50) NOT NULL,
            current BOOLEAN NOT NULL DEFAULT FALSE,
            document JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resource_history (
            id UUID PRIMARY KEY,
            resource_id UUID NOT NULL,
            resource_version INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            document JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_resources_template_name ON resources(template_name)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_resources_workspace_id ON resources(workspace_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_resources_parent_service_id ON resources(parent_workspace_service_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_operations_resource_id ON operations(resource_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_templates_current ON resource_templates(name, resource_type) WHERE current",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_history_resource ON resource_history(resource_id, resource_version)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed");

    Ok(())
}
