//! Operation API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use relay_core::domain::operation::Operation;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /operations/{id}
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Operation>> {
    tracing::debug!("Getting operation: {}", id);

    let operation = state.repos.operations.get(id).await?;
    Ok(Json(operation))
}

/// GET /resources/{id}/operations
/// Operations run against a resource, newest first
pub async fn list_resource_operations(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Operation>>> {
    tracing::debug!("Listing operations for resource: {}", id);

    // 404 for an unknown resource rather than an empty list
    state.repos.resources.get(id).await?;
    let operations = state.repos.operations.list_by_resource(id).await?;
    Ok(Json(operations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::api::testing::state;
    use relay_core::domain::status::RequestAction;
    use relay_core::domain::user::User;

    #[tokio::test]
    async fn test_get_operation_returns_stored_operation() {
        let (state, fixture) = state().await;
        let workspace = fixture.workspace("ws").await;
        let operation = state
            .sender
            .send(&workspace, RequestAction::Upgrade, User::default(), false)
            .await
            .unwrap();

        let Json(found) = get_operation(State(state), Path(operation.id)).await.unwrap();
        assert_eq!(found.id, operation.id);
        assert_eq!(found.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_operation_is_not_found() {
        let (state, _) = state().await;
        let result = get_operation(State(state), Path(Uuid::new_v4())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_resource_operations() {
        let (state, fixture) = state().await;
        let workspace = fixture.workspace("ws").await;
        for action in [RequestAction::Upgrade, RequestAction::Custom("disable".to_string())] {
            state
                .sender
                .send(&workspace, action, User::default(), false)
                .await
                .unwrap();
        }

        let Json(operations) = list_resource_operations(State(state.clone()), Path(workspace.id))
            .await
            .unwrap();
        assert_eq!(operations.len(), 2);
        assert!(operations.iter().all(|o| o.resource_id == workspace.id));

        let result = list_resource_operations(State(state), Path(Uuid::new_v4())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
