//! The analysis seam: the slow, non-deterministic backend that turns a
//! repository into an article.
//!
//! The orchestration layer only depends on the `Analyzer` trait: an
//! incremental stream of progress events ending in exactly one terminal
//! event. Events are forwarded as they arrive, never buffered whole.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::articles::{ArticleData, Author};
use super::jobs::ProgressEvent;
use super::slug::parse_repo_url;

/// Runs one analysis and streams its progress.
///
/// The receiver yields zero or more non-terminal events followed by exactly
/// one `Complete` or `Error`. A channel that closes without a terminal event
/// is treated as a failure by the worker. An `Err` from `analyze` itself
/// means the backend could not even be reached.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        repo_url: &str,
        job_id: Uuid,
    ) -> Result<mpsc::Receiver<ProgressEvent>>;
}

// =============================================================================
// LLM-backed analyzer
// =============================================================================

/// Production analyzer: fetches repository metadata from the host API, then
/// asks an OpenAI-compatible chat backend for the article.
pub struct LlmAnalyzer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct RepoMetadata {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmAnalyzer {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
            model,
        }
    }

    /// Opaque "fetch context" step: repository metadata from the host API.
    /// Only GitHub has a public metadata endpoint we use; other hosts get a
    /// minimal context from the URL alone.
    async fn fetch_context(&self, repo_url: &str) -> Result<String> {
        let (owner, name) =
            parse_repo_url(repo_url).context("analyzer received an unparseable URL")?;

        if !repo_url.contains("github.com") {
            return Ok(format!("Repository: {owner}/{name} ({repo_url})"));
        }

        let metadata: RepoMetadata = self
            .http
            .get(format!("https://api.github.com/repos/{owner}/{name}"))
            .header("User-Agent", "repo-press")
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .context("failed to reach the repository host")?
            .error_for_status()
            .context("repository metadata request was rejected")?
            .json()
            .await
            .context("failed to parse repository metadata")?;

        Ok(format!(
            "Repository: {owner}/{}\nDescription: {}\nPrimary language: {}\nStars: {}\nTopics: {}",
            metadata.name,
            metadata.description.as_deref().unwrap_or("none"),
            metadata.language.as_deref().unwrap_or("unknown"),
            metadata.stargazers_count,
            metadata.topics.join(", "),
        ))
    }

    async fn generate(&self, context: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a satirical tech journalist writing for a parody \
                        of a startup news site. Given repository metadata, write an \
                        exaggerated fake news article about it. Respond with a single \
                        JSON object with fields: headline (string), category (string), \
                        tags (array of strings), content (array of paragraph strings)."
                },
                { "role": "user", "content": context }
            ]
        });

        let response: ChatResponse = self
            .http
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach the generation backend")?
            .error_for_status()
            .context("generation backend rejected the request")?
            .json()
            .await
            .context("failed to parse the generation response")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("generation backend returned no choices")
    }

    async fn run(&self, repo_url: &str, tx: &mpsc::Sender<ProgressEvent>) -> Result<()> {
        // A closed receiver means the job was abandoned mid-run; stop
        // producing rather than erroring.
        if tx
            .send(ProgressEvent::Progress {
                message: "Fetching repository metadata...".to_string(),
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        let context = self.fetch_context(repo_url).await?;

        if tx
            .send(ProgressEvent::Progress {
                message: "Generating article...".to_string(),
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        let output = self.generate(&context).await?;
        let article = parse_article(&output);

        let _ = tx.send(ProgressEvent::Complete { article }).await;
        Ok(())
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(
        &self,
        repo_url: &str,
        job_id: Uuid,
    ) -> Result<mpsc::Receiver<ProgressEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let analyzer = LlmAnalyzer {
            http: self.http.clone(),
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
        };
        let repo_url = repo_url.to_string();

        tokio::spawn(async move {
            if let Err(e) = analyzer.run(&repo_url, &tx).await {
                tracing::warn!(job_id = %job_id, error = %e, "analysis failed");
                let _ = tx.send(ProgressEvent::error(e.to_string())).await;
            }
        });

        Ok(rx)
    }
}

fn default_author() -> Author {
    Author {
        name: "Morgan Hale".to_string(),
        title: "Senior Correspondent".to_string(),
        avatar: "https://api.dicebear.com/7.x/avataaars/svg?seed=press".to_string(),
        bio: "Covers the repository beat with unwarranted enthusiasm.".to_string(),
        twitter: "morganhale".to_string(),
    }
}

fn default_timestamp() -> String {
    Utc::now().format("%B %-d, %Y, %-I:%M %p UTC").to_string()
}

#[derive(Default, Deserialize)]
struct RawArticle {
    headline: Option<String>,
    category: Option<String>,
    tags: Option<Vec<String>>,
    content: Option<serde_json::Value>,
}

/// Extract the article JSON from the model's reply; wrap raw text in a
/// fallback article when no parseable JSON is present.
pub fn parse_article(output: &str) -> ArticleData {
    let raw = extract_json_object(output)
        .and_then(|json| serde_json::from_str::<RawArticle>(json).ok())
        .unwrap_or_default();

    let content = match raw.content {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_json::Value::String(s)) => vec![s],
        _ => output
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string)
            .collect(),
    };

    ArticleData {
        headline: raw
            .headline
            .unwrap_or_else(|| "Untitled Article".to_string()),
        author: default_author(),
        timestamp: default_timestamp(),
        category: raw.category.unwrap_or_else(|| "Startups".to_string()),
        image: "https://images.unsplash.com/photo-1620712943543-bcc4688e7485?q=80&w=2560&auto=format&fit=crop"
            .to_string(),
        image_credit: "AI Generated".to_string(),
        tags: raw
            .tags
            .unwrap_or_else(|| vec!["Startups".to_string(), "Tech".to_string()]),
        content,
    }
}

/// The model often wraps its JSON in prose or a code fence; take the
/// outermost brace-delimited span.
fn extract_json_object(output: &str) -> Option<&str> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end > start {
        Some(&output[start..=end])
    } else {
        None
    }
}

// =============================================================================
// Scripted analyzer (test double)
// =============================================================================

/// Replays a fixed event script, optionally pacing events out over time.
pub struct ScriptedAnalyzer {
    script: Vec<ProgressEvent>,
    delay: Option<std::time::Duration>,
}

impl ScriptedAnalyzer {
    pub fn new(script: Vec<ProgressEvent>) -> Self {
        Self {
            script,
            delay: None,
        }
    }

    /// A script that completes with the given article after one progress event.
    pub fn completing_with(article: ArticleData) -> Self {
        Self::new(vec![
            ProgressEvent::Progress {
                message: "Analyzing...".to_string(),
            },
            ProgressEvent::Complete { article },
        ])
    }

    /// A script that fails with the given backend message.
    pub fn failing_with(message: &str) -> Self {
        Self::new(vec![ProgressEvent::error(message)])
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        _repo_url: &str,
        _job_id: Uuid,
    ) -> Result<mpsc::Receiver<ProgressEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let script = self.script.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            for event in script {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
