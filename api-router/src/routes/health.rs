use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// `GET /health`. Reports each logical service's status -- `rel`, `index`,
/// and `graph` are all the same SurrealDB connection in this deployment, so
/// one ping covers all three; `cache` is in-process and always up once the
/// process itself is. 503 if the database ping fails.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    match state.db.client.query("RETURN true").await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "services": {
                    "rel": "up",
                    "index": "up",
                    "graph": "up",
                    "cache": "up",
                }
            })),
        ),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "services": {
                    "rel": "down",
                    "index": "down",
                    "graph": "down",
                    "cache": "up",
                },
                "reason": err.to_string(),
            })),
        ),
    }
}
