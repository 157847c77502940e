//! Result store: generated articles cached by slug.
//!
//! At most one article exists per slug. Re-saving a slug replaces the
//! payload and refreshes `updated_at` while preserving the original
//! `created_at`, which resolves the benign race where two jobs for the same
//! never-before-seen slug both run to completion (last write wins).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    pub title: String,
    pub avatar: String,
    pub bio: String,
    pub twitter: String,
}

/// Generated article payload, matching what the frontend renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleData {
    pub headline: String,
    pub author: Author,
    pub timestamp: String,
    pub category: String,
    pub image: String,
    pub image_credit: String,
    pub tags: Vec<String>,
    pub content: Vec<String>,
}

/// A cached article plus its storage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArticle {
    pub slug: String,
    pub source_url: String,
    pub article: ArticleData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_ref: Option<String>,
}

/// Durable key-value store for generated articles, keyed by slug.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn exists(&self, slug: &str) -> Result<bool>;

    async fn get(&self, slug: &str) -> Result<Option<StoredArticle>>;

    /// Upsert an article. Preserves `created_at` on overwrite. `trace_ref`
    /// links the stored result back to the generation run that produced it.
    async fn save(
        &self,
        slug: &str,
        source_url: &str,
        article: ArticleData,
        trace_ref: Option<&str>,
    ) -> Result<StoredArticle>;

    /// Delete an article (used to force regeneration). Returns false if absent.
    async fn delete(&self, slug: &str) -> Result<bool>;

    /// Most recent articles plus the total count, newest first.
    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<StoredArticle>, i64)>;

    /// Case-insensitive substring match over headline, category, and author
    /// name. Newest first, bounded by `limit`.
    async fn search(&self, query: &str, limit: i64) -> Result<Vec<StoredArticle>>;
}

// =============================================================================
// In-memory store (tests and single-process development)
// =============================================================================

#[derive(Default)]
pub struct InMemoryArticleStore {
    articles: Mutex<HashMap<String, StoredArticle>>,
}

impl InMemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_snapshot(&self) -> Vec<StoredArticle> {
        let mut all: Vec<StoredArticle> =
            self.articles.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }
}

#[async_trait]
impl ArticleStore for InMemoryArticleStore {
    async fn exists(&self, slug: &str) -> Result<bool> {
        Ok(self.articles.lock().unwrap().contains_key(slug))
    }

    async fn get(&self, slug: &str) -> Result<Option<StoredArticle>> {
        Ok(self.articles.lock().unwrap().get(slug).cloned())
    }

    async fn save(
        &self,
        slug: &str,
        source_url: &str,
        article: ArticleData,
        trace_ref: Option<&str>,
    ) -> Result<StoredArticle> {
        let now = Utc::now();
        let mut articles = self.articles.lock().unwrap();
        let created_at = articles.get(slug).map(|a| a.created_at).unwrap_or(now);
        let stored = StoredArticle {
            slug: slug.to_string(),
            source_url: source_url.to_string(),
            article,
            created_at,
            updated_at: now,
            trace_ref: trace_ref.map(str::to_string),
        };
        articles.insert(slug.to_string(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, slug: &str) -> Result<bool> {
        Ok(self.articles.lock().unwrap().remove(slug).is_some())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<StoredArticle>, i64)> {
        let all = self.sorted_snapshot();
        let total = all.len() as i64;
        let page = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<StoredArticle>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let matches = self
            .sorted_snapshot()
            .into_iter()
            .filter(|stored| {
                stored.article.headline.to_lowercase().contains(&needle)
                    || stored.article.category.to_lowercase().contains(&needle)
                    || stored.article.author.name.to_lowercase().contains(&needle)
            })
            .take(limit.max(0) as usize)
            .collect();
        Ok(matches)
    }
}

// =============================================================================
// Postgres store
// =============================================================================

#[derive(sqlx::FromRow)]
struct ArticleRow {
    slug: String,
    source_url: String,
    article: sqlx::types::Json<ArticleData>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    trace_ref: Option<String>,
}

impl From<ArticleRow> for StoredArticle {
    fn from(row: ArticleRow) -> Self {
        StoredArticle {
            slug: row.slug,
            source_url: row.source_url,
            article: row.article.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            trace_ref: row.trace_ref,
        }
    }
}

pub struct PgArticleStore {
    pool: PgPool,
}

impl PgArticleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ARTICLE_COLUMNS: &str = "slug, source_url, article, created_at, updated_at, trace_ref";

#[async_trait]
impl ArticleStore for PgArticleStore {
    async fn exists(&self, slug: &str) -> Result<bool> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM articles WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .context("failed to check article existence")?;
        Ok(found.is_some())
    }

    async fn get(&self, slug: &str) -> Result<Option<StoredArticle>> {
        let row = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load article")?;
        Ok(row.map(StoredArticle::from))
    }

    async fn save(
        &self,
        slug: &str,
        source_url: &str,
        article: ArticleData,
        trace_ref: Option<&str>,
    ) -> Result<StoredArticle> {
        let row = sqlx::query_as::<_, ArticleRow>(&format!(
            r#"
            INSERT INTO articles (slug, source_url, article, trace_ref, created_at, updated_at)
            VALUES ($1, $2, $3, $4, now(), now())
            ON CONFLICT (slug) DO UPDATE
            SET source_url = EXCLUDED.source_url,
                article = EXCLUDED.article,
                trace_ref = EXCLUDED.trace_ref,
                updated_at = now()
            RETURNING {ARTICLE_COLUMNS}
            "#
        ))
        .bind(slug)
        .bind(source_url)
        .bind(sqlx::types::Json(article))
        .bind(trace_ref)
        .fetch_one(&self.pool)
        .await
        .context("failed to save article")?;
        Ok(row.into())
    }

    async fn delete(&self, slug: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM articles WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await
            .context("failed to delete article")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<StoredArticle>, i64)> {
        let rows = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("failed to list articles")?;

        let total: i64 = sqlx::query_scalar("SELECT count(*) FROM articles")
            .fetch_one(&self.pool)
            .await
            .context("failed to count articles")?;

        Ok((rows.into_iter().map(StoredArticle::from).collect(), total))
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<StoredArticle>> {
        let needle = query.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{needle}%");
        let rows = sqlx::query_as::<_, ArticleRow>(&format!(
            r#"
            SELECT {ARTICLE_COLUMNS} FROM articles
            WHERE article->>'headline' ILIKE $1
               OR article->>'category' ILIKE $1
               OR article->'author'->>'name' ILIKE $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to search articles")?;
        Ok(rows.into_iter().map(StoredArticle::from).collect())
    }
}
