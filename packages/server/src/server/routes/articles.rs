//! Read/delete surface over the article store.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::kernel::articles::StoredArticle;
use crate::kernel::slug::sanitize_slug;
use crate::server::app::AppState;
use crate::server::error::ApiError;

const MAX_PAGE_SIZE: i64 = 100;
const SEARCH_LIMIT: i64 = 20;

/// The slug must survive sanitization unchanged; anything else is either a
/// typo or a traversal attempt.
fn validate_slug(raw: &str) -> Result<String, ApiError> {
    let clean = sanitize_slug(raw);
    if clean.is_empty() || clean != raw {
        return Err(ApiError::BadRequest("Invalid slug".to_string()));
    }
    Ok(clean)
}

/// GET /api/article/:slug (HEAD is served from the same handler)
pub async fn get_article(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<StoredArticle>, ApiError> {
    let slug = validate_slug(&slug)?;
    let article = state
        .deps
        .articles
        .get(&slug)
        .await?
        .ok_or(ApiError::NotFound("Article not found"))?;
    Ok(Json(article))
}

/// DELETE /api/article/:slug
///
/// Removing a cached article forces the next request for its repository to
/// regenerate.
pub async fn delete_article(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let slug = validate_slug(&slug)?;
    let deleted = state.deps.articles.delete(&slug).await?;
    if !deleted {
        return Err(ApiError::NotFound("Article not found"));
    }
    info!(%slug, "article deleted");
    Ok(Json(json!({ "deleted": true, "slug": slug })))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub articles: Vec<StoredArticle>,
    pub total: i64,
}

/// GET /api/article?limit=&offset=
pub async fn list_articles(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    let limit = params.limit.clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.max(0);
    let (articles, total) = state.deps.articles.list(limit, offset).await?;
    Ok(Json(ListResponse { articles, total }))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

/// GET /api/article/search?q=
pub async fn search_articles(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Missing search query".to_string()));
    }
    let results = state.deps.articles.search(query, SEARCH_LIMIT).await?;
    Ok(Json(json!({ "results": results })))
}
