//! Trending repository suggestion.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

use crate::server::app::AppState;

/// GET /api/trending
///
/// Best-effort: any feed or store problem degrades to `suggestion: null`
/// rather than an error status, since the suggestion is decorative.
pub async fn trending(State(state): State<AppState>) -> Json<Value> {
    let suggestion = match state
        .deps
        .trending
        .suggest(state.deps.articles.as_ref())
        .await
    {
        Ok(suggestion) => suggestion,
        Err(e) => {
            warn!(error = %e, "trending suggestion failed");
            None
        }
    };
    Json(json!({ "suggestion": suggestion }))
}
