use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::server::app::AppState;
use crate::server::error::ApiError;

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let depth = state.deps.queue.depth().await?;
    Ok(Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "queueDepth": depth,
    })))
}
