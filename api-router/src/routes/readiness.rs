use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: returns 200 if the database answers and the processing queue is open,
/// else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let queue_open = !state.queue.is_closed();
    match state.db.client.query("RETURN true").await {
        Ok(_) if queue_open => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "db": "ok", "queue": "ok" },
                "queue_available": state.queue.available()
            })),
        ),
        Ok(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": "ok", "queue": "fail" },
                "reason": "processing queue is closed"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": "fail" },
                "reason": e.to_string()
            })),
        ),
    }
}
