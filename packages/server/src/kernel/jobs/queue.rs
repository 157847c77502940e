//! Admission queue: the durable, ordered holding area for analysis jobs.
//!
//! Jobs are served strictly FIFO by enqueue time. A job's queue position is
//! recomputed on demand (jobs ahead of it finish at any time), never cached.
//! Terminal jobs are retained for a bounded window (short for completed,
//! long for failed, to support debugging) and purged lazily.

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{Job, JobState};

/// How long terminal jobs stay queryable before the sweeper removes them.
pub const COMPLETED_RETENTION_SECS: i64 = 3600;
pub const FAILED_RETENTION_SECS: i64 = 86_400;

/// Ordered, shared work queue with atomic state transitions.
///
/// All operations must be safe under concurrent access from multiple workers
/// and multiple inbound connections; `claim_next` in particular must never
/// hand the same job to two workers.
#[async_trait]
pub trait AdmissionQueue: Send + Sync {
    /// Admit a new job in the waiting state.
    async fn enqueue(&self, repo_url: &str, slug: &str) -> Result<Job>;

    /// Atomically claim the oldest waiting job, marking it active.
    async fn claim_next(&self) -> Result<Option<Job>>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// 1-based rank among waiting jobs by enqueue time; 0 once the job is
    /// active, terminal, or unknown.
    async fn position_of(&self, job_id: Uuid) -> Result<i64>;

    /// Waiting plus active job count.
    async fn depth(&self) -> Result<i64>;

    async fn mark_completed(&self, job_id: Uuid) -> Result<()>;

    /// Record the failure reason; the job is not retried.
    async fn mark_failed(&self, job_id: Uuid, reason: &str) -> Result<()>;

    /// Drop terminal jobs past their retention window. Returns removed count.
    async fn purge_expired(&self) -> Result<u64>;
}

// =============================================================================
// In-memory queue (tests and single-process development)
// =============================================================================

/// Vec keeps insertion order, which is exactly the FIFO order we serve in.
#[derive(Default)]
pub struct InMemoryQueue {
    jobs: Mutex<Vec<Job>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdmissionQueue for InMemoryQueue {
    async fn enqueue(&self, repo_url: &str, slug: &str) -> Result<Job> {
        let job = Job::new(repo_url, slug);
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job)
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let claimed = jobs.iter_mut().find(|j| j.state == JobState::Waiting);
        Ok(claimed.map(|job| {
            job.state = JobState::Active;
            job.started_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == job_id)
            .cloned())
    }

    async fn position_of(&self, job_id: Uuid) -> Result<i64> {
        let jobs = self.jobs.lock().unwrap();
        let position = jobs
            .iter()
            .filter(|j| j.state == JobState::Waiting)
            .position(|j| j.id == job_id);
        Ok(position.map(|p| p as i64 + 1).unwrap_or(0))
    }

    async fn depth(&self) -> Result<i64> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .filter(|j| matches!(j.state, JobState::Waiting | JobState::Active))
            .count() as i64)
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.state = JobState::Completed;
            job.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, reason: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.state = JobState::Failed;
            job.error = Some(reason.to_string());
            job.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|job| match (job.state, job.finished_at) {
            (JobState::Completed, Some(finished)) => {
                now - finished < Duration::seconds(COMPLETED_RETENTION_SECS)
            }
            (JobState::Failed, Some(finished)) => {
                now - finished < Duration::seconds(FAILED_RETENTION_SECS)
            }
            _ => true,
        });
        Ok((before - jobs.len()) as u64)
    }
}

// =============================================================================
// Postgres queue
// =============================================================================

/// Postgres-backed queue shared by every process instance.
///
/// Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers never grab
/// the same row; a `BIGSERIAL` sequence column gives a total FIFO order even
/// when two enqueues share a timestamp.
pub struct PgAdmissionQueue {
    pool: PgPool,
}

impl PgAdmissionQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str =
    "id, repo_url, slug, state, error, created_at, started_at, finished_at";

#[async_trait]
impl AdmissionQueue for PgAdmissionQueue {
    async fn enqueue(&self, repo_url: &str, slug: &str) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            INSERT INTO jobs (id, repo_url, slug, state, created_at)
            VALUES ($1, $2, $3, 'waiting', now())
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(repo_url)
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .context("failed to enqueue job")?;
        Ok(job)
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET state = 'active', started_at = now()
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'waiting'
                ORDER BY seq ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await
        .context("failed to claim job")?;
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load job")?;
        Ok(job)
    }

    async fn position_of(&self, job_id: Uuid) -> Result<i64> {
        // Counts the job itself plus every waiting job enqueued before it;
        // NULL subquery (job not waiting) makes the count zero.
        let position: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM jobs
            WHERE state = 'waiting'
              AND seq <= (SELECT seq FROM jobs WHERE id = $1 AND state = 'waiting')
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to compute queue position")?;
        Ok(position)
    }

    async fn depth(&self) -> Result<i64> {
        let depth: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM jobs WHERE state IN ('waiting', 'active')",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to compute queue depth")?;
        Ok(depth)
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'completed', finished_at = now() WHERE id = $1 AND state = 'active'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("failed to mark job completed")?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'failed', error = $2, finished_at = now() WHERE id = $1 AND state = 'active'",
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .context("failed to mark job failed")?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE (state = 'completed' AND finished_at < now() - make_interval(secs => $1))
               OR (state = 'failed' AND finished_at < now() - make_interval(secs => $2))
            "#,
        )
        .bind(COMPLETED_RETENTION_SECS as f64)
        .bind(FAILED_RETENTION_SECS as f64)
        .execute(&self.pool)
        .await
        .context("failed to purge expired jobs")?;
        Ok(result.rows_affected())
    }
}
