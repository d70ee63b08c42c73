//! Health Check API Handler
//!
//! Doubles as the liveness check: once the runner watchdog has seen every
//! worker die, the process reports itself unavailable.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::api::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.liveness.is_alive() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Resource processors have failed")
    }
}
