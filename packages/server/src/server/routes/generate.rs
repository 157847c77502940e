//! Intake endpoint: validate, short-circuit on cache, rate limit, admit.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::kernel::articles::StoredArticle;
use crate::kernel::rate_limit::LimitScope;
use crate::kernel::slug::url_to_slug;
use crate::server::app::AppState;
use crate::server::error::ApiError;
use crate::server::middleware::ClientId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub repo_url: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum GenerateResponse {
    #[serde(rename_all = "camelCase")]
    Cached {
        cached: bool,
        slug: String,
        article: StoredArticle,
    },
    #[serde(rename_all = "camelCase")]
    Admitted {
        cached: bool,
        job_id: Uuid,
        slug: String,
        position: i64,
    },
}

/// POST /api/generate
///
/// Checks run in a fixed order: validation, cache, rate limit, admission.
/// A cache hit is free and never touches the limiter; a rejected request
/// never consumes queue capacity or rate budget.
pub async fn generate(
    State(state): State<AppState>,
    Extension(ClientId(client)): Extension<ClientId>,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Responses depend on live queue and limiter state; never cacheable.
    let no_store = [(header::CACHE_CONTROL, "no-store")];
    let deps = &state.deps;

    let slug = url_to_slug(&request.repo_url).ok_or_else(|| {
        ApiError::BadRequest(
            "Invalid repository URL. Expected e.g. https://github.com/owner/repo".to_string(),
        )
    })?;

    if let Some(article) = deps.articles.get(&slug).await? {
        info!(%slug, "cache hit, skipping generation");
        return Ok((
            no_store,
            Json(GenerateResponse::Cached {
                cached: true,
                slug,
                article,
            }),
        ));
    }

    let decision = deps.limiter.check_and_increment(&client).await?;
    if !decision.allowed {
        let retry_minutes = deps.limiter.reset_minutes().await?;
        let scope = decision.reason.unwrap_or(LimitScope::Global);
        let message = match scope {
            LimitScope::Global => format!(
                "Daily article limit reached ({} per day). Please try again tomorrow.",
                decision.global.limit
            ),
            LimitScope::Client => format!(
                "You've hit your daily limit of {} articles. Please try again tomorrow.",
                decision.client.limit
            ),
        };
        return Err(ApiError::RateLimited {
            scope,
            message,
            retry_minutes,
        });
    }

    let job = deps.queue.enqueue(&request.repo_url, &slug).await?;
    // Reported position is the queue depth after admission: how many jobs
    // (waiting or active) stand between the client and an idle worker. The
    // progress stream reports the finer waiting-only rank.
    let position = deps.queue.depth().await?;
    info!(job_id = %job.id, %slug, position, "job admitted");

    Ok((
        no_store,
        Json(GenerateResponse::Admitted {
            cached: false,
            job_id: job.id,
            slug,
            position,
        }),
    ))
}
