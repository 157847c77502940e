use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Worker pool size: how many analyses may run at once
    pub max_concurrent_jobs: usize,
    /// Articles generated per day, across all clients
    pub daily_article_limit: i64,
    /// Articles generated per day, per client IP
    pub ip_daily_limit: i64,
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            max_concurrent_jobs: env::var("MAX_CONCURRENT_JOBS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("MAX_CONCURRENT_JOBS must be a valid number")?,
            daily_article_limit: env::var("DAILY_ARTICLE_LIMIT")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("DAILY_ARTICLE_LIMIT must be a valid number")?,
            ip_daily_limit: env::var("IP_DAILY_LIMIT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("IP_DAILY_LIMIT must be a valid number")?,
            llm_api_url: env::var("LLM_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_api_key: env::var("LLM_API_KEY").context("LLM_API_KEY must be set")?,
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        })
    }
}
