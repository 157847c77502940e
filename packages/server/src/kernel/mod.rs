// Kernel: shared infrastructure behind the HTTP layer.
//
// Everything here is a trait seam with a Postgres implementation for
// production and an in-memory implementation for tests, except the
// StreamHub, which is in-process by design (events are ephemeral).

pub mod analyzer;
pub mod articles;
pub mod deps;
pub mod jobs;
pub mod rate_limit;
pub mod slug;
pub mod stream_hub;
pub mod trending;

pub use analyzer::{Analyzer, LlmAnalyzer, ScriptedAnalyzer};
pub use articles::{ArticleData, ArticleStore, Author, InMemoryArticleStore, PgArticleStore, StoredArticle};
pub use deps::ServerDeps;
pub use rate_limit::{
    InMemoryRateLimiter, LimitScope, PgRateLimiter, RateLimitDecision, RateLimitStatus,
    RateLimiter, RateLimits,
};
pub use stream_hub::StreamHub;
pub use trending::{
    HttpTrendingFeed, StaticTrendingFeed, TrendingFeed, TrendingRepo, TrendingService,
};
