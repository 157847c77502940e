use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use server_core::kernel::analyzer::LlmAnalyzer;
use server_core::kernel::articles::PgArticleStore;
use server_core::kernel::deps::ServerDeps;
use server_core::kernel::jobs::{PgAdmissionQueue, WorkerConfig, WorkerPool};
use server_core::kernel::rate_limit::{PgRateLimiter, RateLimits};
use server_core::kernel::trending::HttpTrendingFeed;
use server_core::server::build_app;
use server_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "server=info,server_core=info,tower_http=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    info!("database migrations applied");

    let limits = RateLimits {
        global_per_day: config.daily_article_limit,
        client_per_day: config.ip_daily_limit,
    };
    let deps = Arc::new(ServerDeps::new(
        Arc::new(PgAdmissionQueue::new(pool.clone())),
        Arc::new(PgArticleStore::new(pool.clone())),
        Arc::new(PgRateLimiter::new(pool.clone(), limits)),
        Arc::new(LlmAnalyzer::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
        )),
        Arc::new(HttpTrendingFeed::new()),
    ));

    let shutdown = CancellationToken::new();
    let worker_config = WorkerConfig {
        concurrency: config.max_concurrent_jobs,
        ..WorkerConfig::default()
    };
    let workers = WorkerPool::with_config(deps.clone(), worker_config).spawn(shutdown.clone());

    let app = build_app(deps);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "server listening");

    // ConnectInfo is required by the client-id middleware for direct
    // connections without proxy headers.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .context("server error")?;

    shutdown.cancel();
    for handle in workers {
        let _ = handle.await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    // Errors installing the handler leave us running until killed.
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    token.cancel();
}
