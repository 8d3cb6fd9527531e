//! Health and queue status handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::metrics;
use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Queue depth as `{"queue_count": n}`, or `{}` when the broker can't say.
pub async fn queue_status(State(state): State<AppState>) -> Json<Value> {
    match state.queue.count().await {
        Some(count) => {
            metrics::set_queue_length(count);
            Json(json!({ "queue_count": count }))
        }
        None => Json(json!({})),
    }
}
