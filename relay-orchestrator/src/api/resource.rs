//! Resource API Handlers
//!
//! Internal trigger for starting an operation on a stored resource.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use relay_core::domain::operation::Operation;
use relay_core::domain::status::{RequestAction, Status};
use relay_core::domain::user::User;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub is_cascade: bool,
}

/// POST /resources/{id}/actions/{action}
/// Start an operation and send its first step
pub async fn invoke_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(Uuid, RequestAction)>,
    body: Option<Json<ActionRequest>>,
) -> ApiResult<(StatusCode, Json<Operation>)> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    tracing::info!("Requesting {} on resource {}", action, id);

    let resource = state.repos.resources.get(id).await?;
    if resource.deployment_status == Status::Deleted {
        return Err(ApiError::BadRequest(format!("Resource {} has been deleted", id)));
    }

    let operation = state
        .sender
        .send(&resource, action, request.user, request.is_cascade)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(operation)))
}
