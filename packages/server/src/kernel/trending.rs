//! Trending repository suggestions.
//!
//! Surfaces a random currently-trending repository that has no article yet,
//! so the frontend can offer a one-click prompt. The upstream feed is fetched
//! at most once an hour; a stale list is served over a fetch failure, and an
//! empty list simply means no suggestion.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::articles::ArticleStore;
use super::slug::url_to_slug;

const CACHE_TTL_SECS: i64 = 3600;
const FEED_URL: &str =
    "https://raw.githubusercontent.com/isboyjc/github-trending-api/main/data/weekly/all.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingRepo {
    pub owner: String,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub stars: i64,
    pub language: Option<String>,
}

/// Source of the raw trending list.
#[async_trait]
pub trait TrendingFeed: Send + Sync {
    async fn fetch(&self) -> Result<Vec<TrendingRepo>>;
}

// =============================================================================
// Upstream feed over HTTP
// =============================================================================

#[derive(Deserialize)]
struct FeedPayload {
    items: Vec<FeedItem>,
}

#[derive(Deserialize)]
struct FeedItem {
    /// "owner/repo"
    title: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    stars: i64,
    #[serde(default)]
    language: Option<String>,
}

pub struct HttpTrendingFeed {
    http: reqwest::Client,
}

impl HttpTrendingFeed {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTrendingFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrendingFeed for HttpTrendingFeed {
    async fn fetch(&self) -> Result<Vec<TrendingRepo>> {
        let payload: FeedPayload = self
            .http
            .get(FEED_URL)
            .header("Accept", "application/json")
            .header("User-Agent", "repo-press")
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .context("failed to reach the trending feed")?
            .error_for_status()
            .context("trending feed request was rejected")?
            .json()
            .await
            .context("failed to parse the trending feed")?;

        let repos = payload
            .items
            .into_iter()
            .filter_map(|item| {
                let (owner, name) = item.title.split_once('/')?;
                Some(TrendingRepo {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    url: item.url,
                    description: item.description,
                    stars: item.stars,
                    language: item.language,
                })
            })
            .collect();
        Ok(repos)
    }
}

// =============================================================================
// Cached suggestion service
// =============================================================================

struct FeedCache {
    repos: Vec<TrendingRepo>,
    fetched_at: DateTime<Utc>,
}

/// Hourly-cached view over a `TrendingFeed` that can pick an unprocessed
/// repository at random.
pub struct TrendingService {
    feed: Arc<dyn TrendingFeed>,
    cache: Mutex<Option<FeedCache>>,
}

impl TrendingService {
    pub fn new(feed: Arc<dyn TrendingFeed>) -> Self {
        Self {
            feed,
            cache: Mutex::new(None),
        }
    }

    /// Current trending list, refreshed at most once per TTL. A failed
    /// refresh falls back to whatever was cached last.
    async fn repos(&self) -> Vec<TrendingRepo> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(cached) = cache.as_ref() {
                if Utc::now() - cached.fetched_at < Duration::seconds(CACHE_TTL_SECS) {
                    return cached.repos.clone();
                }
            }
        }

        match self.feed.fetch().await {
            Ok(repos) => {
                debug!(count = repos.len(), "refreshed trending feed");
                let mut cache = self.cache.lock().unwrap();
                *cache = Some(FeedCache {
                    repos: repos.clone(),
                    fetched_at: Utc::now(),
                });
                repos
            }
            Err(e) => {
                warn!(error = %e, "trending feed refresh failed, serving stale list");
                let cache = self.cache.lock().unwrap();
                cache.as_ref().map(|c| c.repos.clone()).unwrap_or_default()
            }
        }
    }

    /// A random trending repository with no article yet, or None when every
    /// trending repository is already covered (or the feed is empty).
    pub async fn suggest(&self, articles: &dyn ArticleStore) -> Result<Option<TrendingRepo>> {
        let mut repos = self.repos().await;
        if repos.is_empty() {
            return Ok(None);
        }

        fastrand::shuffle(&mut repos);
        for repo in repos {
            let Some(slug) = url_to_slug(&repo.url) else {
                continue;
            };
            if !articles.exists(&slug).await? {
                return Ok(Some(repo));
            }
        }
        Ok(None)
    }
}

// =============================================================================
// Static feed (test double)
// =============================================================================

/// Serves a fixed list; an empty one means "no suggestions".
pub struct StaticTrendingFeed {
    repos: Vec<TrendingRepo>,
}

impl StaticTrendingFeed {
    pub fn new(repos: Vec<TrendingRepo>) -> Self {
        Self { repos }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl TrendingFeed for StaticTrendingFeed {
    async fn fetch(&self) -> Result<Vec<TrendingRepo>> {
        Ok(self.repos.clone())
    }
}
