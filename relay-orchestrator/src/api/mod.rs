//! API Module
//!
//! Internal HTTP surface of the orchestrator: liveness, operation reads and a
//! trigger for the Resource Request Sender. Authentication and input
//! validation belong to the public API in front of it.

pub mod error;
pub mod health;
pub mod operation;
pub mod resource;

use axum::{
    Router,
    routing::{get, post},
};
use relay_runner::Liveness;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::repository::Repositories;
use crate::service::ResourceRequestSender;

#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub sender: Arc<ResourceRequestSender>,
    pub liveness: Liveness,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        // Operation endpoints
        .route("/operations/{id}", get(operation::get_operation))
        // Resource endpoints
        .route(
            "/resources/{id}/operations",
            get(operation::list_resource_operations),
        )
        .route(
            "/resources/{id}/actions/{action}",
            post(resource::invoke_action),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::service::testing::Fixture;

    pub(crate) async fn state() -> (AppState, Fixture) {
        let fixture = Fixture::new().await;
        let state = AppState {
            repos: fixture.repos.clone(),
            sender: Arc::new(ResourceRequestSender::new(
                fixture.repos.clone(),
                fixture.queue.clone(),
            )),
            liveness: Liveness::new(),
        };
        (state, fixture)
    }
}
