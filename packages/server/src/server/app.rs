//! Router assembly and shared request state.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::deps::ServerDeps;
use crate::server::middleware::extract_client_id;
use crate::server::routes::{articles, generate, health, progress, trending};

#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<ServerDeps>,
}

/// Build the HTTP application.
///
/// `/api/article/search` must be registered alongside `/api/article/:slug`;
/// the router prefers the static segment, so "search" is never treated as a
/// slug.
pub fn build_app(deps: Arc<ServerDeps>) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/generate", post(generate::generate))
        .route("/api/trending", get(trending::trending))
        .route("/api/progress/:job_id", get(progress::progress))
        .route("/api/article", get(articles::list_articles))
        .route("/api/article/search", get(articles::search_articles))
        .route(
            "/api/article/:slug",
            get(articles::get_article).delete(articles::delete_article),
        )
        .layer(middleware::from_fn(extract_client_id))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { deps })
}
