//! Job model and progress events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::articles::ArticleData;

/// Lifecycle state of an analysis job.
///
/// Transitions are monotonic: `Waiting -> Active -> {Completed | Failed}`.
/// There is no retry; the analysis is too expensive to re-run blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One admitted request to analyze a repository.
///
/// `id` is the job's own identity; `slug` is the content identity the result
/// is cached under. Two jobs may share a slug when the same repository is
/// requested twice before the first result lands (accepted duplication).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub repo_url: String,
    pub slug: String,
    pub state: JobState,
    /// Failure reason, set when the job transitions to `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(repo_url: &str, slug: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo_url: repo_url.to_string(),
            slug: slug.to_string(),
            state: JobState::Waiting,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// A progress notification on a job's channel.
///
/// Exactly one terminal event (`Complete` or `Error`) is published per job,
/// and nothing follows it. Events are relayed, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Queued {
        position: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Started {
        message: String,
    },
    Progress {
        message: String,
    },
    Complete {
        article: ArticleData,
    },
    Error {
        error: String,
    },
}

impl ProgressEvent {
    /// Build a queue-position update with the user-facing wait message.
    pub fn queued(position: i64) -> Self {
        let message = if position > 0 {
            format!("You are #{position} in queue...")
        } else {
            "Starting soon...".to_string()
        };
        ProgressEvent::Queued {
            position,
            message: Some(message),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            error: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. } | ProgressEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_lowercase_type_tag() {
        let json = serde_json::to_string(&ProgressEvent::Started {
            message: "Starting analysis...".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"started""#));

        let json = serde_json::to_string(&ProgressEvent::queued(3)).unwrap();
        assert!(json.contains(r#""type":"queued""#));
        assert!(json.contains(r#""position":3"#));
        assert!(json.contains("#3 in queue"));
    }

    #[test]
    fn error_event_carries_the_backend_message() {
        let json = serde_json::to_string(&ProgressEvent::error("repo is private")).unwrap();
        assert!(json.contains(r#""error":"repo is private""#));
    }

    #[test]
    fn only_complete_and_error_are_terminal() {
        assert!(ProgressEvent::error("x").is_terminal());
        assert!(!ProgressEvent::queued(1).is_terminal());
        assert!(!ProgressEvent::Progress {
            message: "working".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn new_job_starts_waiting() {
        let job = Job::new("https://github.com/acme/widget", "acme-widget");
        assert_eq!(job.state, JobState::Waiting);
        assert!(job.error.is_none());
        assert!(!job.state.is_terminal());
    }
}
