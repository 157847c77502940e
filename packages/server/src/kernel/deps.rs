//! Shared service dependencies, injected into workers and HTTP handlers.

use std::sync::Arc;

use crate::kernel::analyzer::Analyzer;
use crate::kernel::articles::ArticleStore;
use crate::kernel::jobs::AdmissionQueue;
use crate::kernel::rate_limit::RateLimiter;
use crate::kernel::stream_hub::StreamHub;
use crate::kernel::trending::{TrendingFeed, TrendingService};

/// Every shared component behind one injection point. The queue, store, and
/// limiter are trait objects so tests run against in-memory implementations
/// while production wires the Postgres-backed ones.
pub struct ServerDeps {
    pub queue: Arc<dyn AdmissionQueue>,
    pub articles: Arc<dyn ArticleStore>,
    pub limiter: Arc<dyn RateLimiter>,
    pub hub: StreamHub,
    pub analyzer: Arc<dyn Analyzer>,
    pub trending: TrendingService,
}

impl ServerDeps {
    pub fn new(
        queue: Arc<dyn AdmissionQueue>,
        articles: Arc<dyn ArticleStore>,
        limiter: Arc<dyn RateLimiter>,
        analyzer: Arc<dyn Analyzer>,
        trending_feed: Arc<dyn TrendingFeed>,
    ) -> Self {
        Self {
            queue,
            articles,
            limiter,
            hub: StreamHub::new(),
            analyzer,
            trending: TrendingService::new(trending_feed),
        }
    }
}
