//! Repository Module
//!
//! Data access layer for the orchestrator. Each repository is a trait with a
//! Postgres implementation (documents stored as JSONB) and an in-memory
//! implementation used by tests and local runs.
//!
//! Updates of resources and operations are guarded by an etag: the caller
//! passes the document it read, and the update fails with
//! `RepositoryError::Conflict` if someone else wrote it in between.

pub mod history;
pub mod memory;
pub mod operation;
pub mod resource;
pub mod template;

use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

pub use history::{PgResourceHistoryRepository, ResourceHistoryItem, ResourceHistoryRepository};
pub use memory::InMemoryStore;
pub use operation::{OperationRepository, PgOperationRepository};
pub use resource::{PgResourceRepository, ResourceRepository};
pub use template::{PgResourceTemplateRepository, ResourceTemplateRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} was modified concurrently (etag mismatch)")]
    Conflict { entity: &'static str, id: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to (de)serialize document: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RepositoryError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn conflict(entity: &'static str, id: impl ToString) -> Self {
        RepositoryError::Conflict {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Conflict { .. })
    }
}

/// The four stores the control plane reads and writes
#[derive(Clone)]
pub struct Repositories {
    pub resources: Arc<dyn ResourceRepository>,
    pub operations: Arc<dyn OperationRepository>,
    pub templates: Arc<dyn ResourceTemplateRepository>,
    pub history: Arc<dyn ResourceHistoryRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            resources: Arc::new(PgResourceRepository::new(pool.clone())),
            operations: Arc::new(PgOperationRepository::new(pool.clone())),
            templates: Arc::new(PgResourceTemplateRepository::new(pool.clone())),
            history: Arc::new(PgResourceHistoryRepository::new(pool)),
        }
    }

    pub fn in_memory(store: InMemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            resources: store.clone(),
            operations: store.clone(),
            templates: store.clone(),
            history: store,
        }
    }
}

/// A fresh etag value
pub(crate) fn new_etag() -> String {
    uuid::Uuid::new_v4().to_string()
}
