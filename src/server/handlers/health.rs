//! Health check handler.

use axum::{extract::State, http::StatusCode, Json};

use crate::server::models::HealthResponse;
use crate::server::state::AppState;

/// 200 once the model is loaded, 503 otherwise
pub async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let engine_state = state.engine.state();
    if state.engine.is_ready() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "active",
                model_status: engine_state.as_str(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                model_status: engine_state.as_str(),
            }),
        )
    }
}
