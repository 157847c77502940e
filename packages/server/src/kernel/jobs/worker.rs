//! Worker pool: bounded-concurrency execution of analysis jobs.
//!
//! A fixed number of workers poll the admission queue; each claims the
//! oldest waiting job, drives the analyzer's event stream, and relays every
//! event to the stream hub. The pool size is the hard concurrency bound: a
//! worker runs one job at a time, so at most N jobs are active across the
//! pool. Backpressure on admission is the rate limiter's problem, not ours.
//!
//! Ordering invariant: a successful job's article is persisted to the store
//! *before* its `complete` event is published, so any subscriber that sees
//! the event can immediately read the result.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{Job, ProgressEvent};
use crate::kernel::deps::ServerDeps;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pool size: max simultaneously active jobs.
    pub concurrency: usize,
    /// How long an idle worker sleeps before re-polling the queue.
    pub poll_interval: Duration,
    /// How often the sweeper purges expired terminal jobs and dead channels.
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

pub struct WorkerPool {
    deps: Arc<ServerDeps>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self {
            deps,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(deps: Arc<ServerDeps>, config: WorkerConfig) -> Self {
        Self { deps, config }
    }

    /// Start the workers and the retention sweeper. Tasks run until the
    /// token is cancelled; in-flight jobs finish their current analysis.
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(concurrency = self.config.concurrency, "worker pool starting");

        let mut handles = Vec::with_capacity(self.config.concurrency + 1);
        for worker_id in 0..self.config.concurrency {
            let deps = self.deps.clone();
            let config = self.config.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_worker(deps, config, worker_id, shutdown).await;
            }));
        }

        let deps = self.deps.clone();
        let sweep_interval = self.config.sweep_interval;
        handles.push(tokio::spawn(async move {
            run_sweeper(deps, sweep_interval, shutdown).await;
        }));

        handles
    }
}

async fn run_worker(
    deps: Arc<ServerDeps>,
    config: WorkerConfig,
    worker_id: usize,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match deps.queue.claim_next().await {
            Ok(Some(job)) => {
                debug!(worker_id, job_id = %job.id, slug = %job.slug, "claimed job");
                process_job(&deps, job).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
            Err(e) => {
                error!(worker_id, error = %e, "failed to claim job");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    info!(worker_id, "worker stopped");
}

async fn process_job(deps: &ServerDeps, job: Job) {
    info!(job_id = %job.id, repo_url = %job.repo_url, slug = %job.slug, "starting analysis");

    deps.hub
        .publish(
            job.id,
            ProgressEvent::Started {
                message: "Starting analysis...".to_string(),
            },
        )
        .await;

    let mut events = match deps.analyzer.analyze(&job.repo_url, job.id).await {
        Ok(rx) => rx,
        Err(e) => {
            // Transport failure before the event stream even opened.
            fail_job(deps, &job, &e.to_string()).await;
            return;
        }
    };

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Complete { article } => {
                // Persist before publishing: a subscriber that observes the
                // terminal event must find the article already stored.
                // The job id doubles as the trace reference linking the
                // stored article back to the run that generated it.
                let trace_ref = job.id.to_string();
                if let Err(e) = deps
                    .articles
                    .save(
                        &job.slug,
                        &job.repo_url,
                        article.clone(),
                        Some(trace_ref.as_str()),
                    )
                    .await
                {
                    fail_job(deps, &job, &format!("failed to save article: {e}")).await;
                    return;
                }

                deps.hub
                    .publish(job.id, ProgressEvent::Complete { article })
                    .await;
                if let Err(e) = deps.queue.mark_completed(job.id).await {
                    error!(job_id = %job.id, error = %e, "failed to mark job completed");
                }
                info!(job_id = %job.id, slug = %job.slug, "job completed");
                return;
            }
            ProgressEvent::Error { error } => {
                fail_job(deps, &job, &error).await;
                return;
            }
            other => deps.hub.publish(job.id, other).await,
        }
    }

    // The analyzer hung up without a terminal event.
    fail_job(deps, &job, "analysis ended without a result").await;
}

/// Publish the terminal error and record the failure reason. The backend's
/// own message is surfaced verbatim so users can diagnose bad URLs.
async fn fail_job(deps: &ServerDeps, job: &Job, reason: &str) {
    warn!(job_id = %job.id, slug = %job.slug, reason, "job failed");
    deps.hub.publish(job.id, ProgressEvent::error(reason)).await;
    if let Err(e) = deps.queue.mark_failed(job.id, reason).await {
        error!(job_id = %job.id, error = %e, "failed to mark job failed");
    }
}

async fn run_sweeper(deps: Arc<ServerDeps>, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match deps.queue.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "purged expired jobs"),
            Err(e) => error!(error = %e, "failed to purge expired jobs"),
        }
        deps.hub.cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::kernel::analyzer::{Analyzer, ScriptedAnalyzer};
    use crate::kernel::articles::{ArticleData, Author, InMemoryArticleStore};
    use crate::kernel::jobs::{InMemoryQueue, JobState};
    use crate::kernel::rate_limit::{InMemoryRateLimiter, RateLimits};
    use crate::kernel::trending::StaticTrendingFeed;

    fn sample_article() -> ArticleData {
        ArticleData {
            headline: "Widget Startup Raises Eyebrows".to_string(),
            author: Author {
                name: "Morgan Hale".to_string(),
                title: "Senior Correspondent".to_string(),
                avatar: "https://example.org/a.svg".to_string(),
                bio: "bio".to_string(),
                twitter: "morganhale".to_string(),
            },
            timestamp: "now".to_string(),
            category: "Startups".to_string(),
            image: "https://example.org/img.jpg".to_string(),
            image_credit: "Generated".to_string(),
            tags: vec!["Tech".to_string()],
            content: vec!["Paragraph.".to_string()],
        }
    }

    fn deps_with(analyzer: Arc<dyn Analyzer>) -> Arc<ServerDeps> {
        Arc::new(ServerDeps::new(
            Arc::new(InMemoryQueue::new()),
            Arc::new(InMemoryArticleStore::new()),
            Arc::new(InMemoryRateLimiter::new(RateLimits::default())),
            analyzer,
            Arc::new(StaticTrendingFeed::empty()),
        ))
    }

    fn fast_pool(deps: Arc<ServerDeps>, concurrency: usize) -> WorkerPool {
        WorkerPool::with_config(
            deps,
            WorkerConfig {
                concurrency,
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        )
    }

    async fn wait_for_state(deps: &ServerDeps, job_id: Uuid, state: JobState) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = deps.queue.get(job_id).await.unwrap().unwrap();
            if job.state == state {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} never reached {state:?}, still {:?}",
                job.state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[derive(Default)]
    struct TrackingInner {
        started: Mutex<Vec<String>>,
        active: AtomicUsize,
        peak_active: AtomicUsize,
    }

    /// Records claim order and tracks the peak number of concurrent runs.
    struct TrackingAnalyzer {
        inner: Arc<TrackingInner>,
        delay: Duration,
    }

    impl TrackingAnalyzer {
        fn new(delay: Duration) -> Self {
            Self {
                inner: Arc::new(TrackingInner::default()),
                delay,
            }
        }
    }

    #[async_trait]
    impl Analyzer for TrackingAnalyzer {
        async fn analyze(
            &self,
            repo_url: &str,
            _job_id: Uuid,
        ) -> Result<mpsc::Receiver<ProgressEvent>> {
            let inner = self.inner.clone();
            inner.started.lock().unwrap().push(repo_url.to_string());
            let active = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
            inner.peak_active.fetch_max(active, Ordering::SeqCst);

            let (tx, rx) = mpsc::channel(4);
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.active.fetch_sub(1, Ordering::SeqCst);
                let _ = tx
                    .send(ProgressEvent::Complete {
                        article: sample_article(),
                    })
                    .await;
            });

            Ok(rx)
        }
    }

    #[tokio::test]
    async fn completes_job_and_saves_article_before_publishing() {
        let deps = deps_with(Arc::new(ScriptedAnalyzer::completing_with(sample_article())));
        let job = deps
            .queue
            .enqueue("https://github.com/acme/widget", "acme-widget")
            .await
            .unwrap();
        let mut rx = deps.hub.subscribe(job.id).await;

        let shutdown = CancellationToken::new();
        fast_pool(deps.clone(), 1).spawn(shutdown.clone());

        // Drain events until the terminal one.
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for events")
                .unwrap();
            if let ProgressEvent::Complete { .. } = event {
                // The store must already reflect the result, tagged with the
                // job that generated it.
                let stored = deps.articles.get("acme-widget").await.unwrap().unwrap();
                assert_eq!(stored.trace_ref.as_deref(), Some(job.id.to_string().as_str()));
                break;
            }
            assert!(!event.is_terminal());
        }

        wait_for_state(&deps, job.id, JobState::Completed).await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn failed_analysis_records_reason_and_frees_the_worker() {
        let deps = deps_with(Arc::new(ScriptedAnalyzer::failing_with("repo is private")));
        let first = deps
            .queue
            .enqueue("https://github.com/a/one", "a-one")
            .await
            .unwrap();
        let second = deps
            .queue
            .enqueue("https://github.com/a/two", "a-two")
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        fast_pool(deps.clone(), 1).spawn(shutdown.clone());

        // Both jobs fail in turn: the worker survives the first failure.
        let failed = wait_for_state(&deps, first.id, JobState::Failed).await;
        wait_for_state(&deps, second.id, JobState::Failed).await;

        assert_eq!(failed.error.as_deref(), Some("repo is private"));
        assert!(deps.articles.get("a-one").await.unwrap().is_none());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn single_worker_serves_jobs_in_admission_order() {
        let tracking = TrackingAnalyzer::new(Duration::from_millis(5));
        let inner = tracking.inner.clone();
        let deps = deps_with(Arc::new(tracking));

        let mut job_ids = Vec::new();
        for i in 0..4 {
            let job = deps
                .queue
                .enqueue(&format!("https://github.com/o/repo{i}"), &format!("o-repo{i}"))
                .await
                .unwrap();
            job_ids.push(job.id);
        }

        let shutdown = CancellationToken::new();
        fast_pool(deps.clone(), 1).spawn(shutdown.clone());

        for id in &job_ids {
            wait_for_state(&deps, *id, JobState::Completed).await;
        }

        let started = inner.started.lock().unwrap().clone();
        let expected: Vec<String> = (0..4)
            .map(|i| format!("https://github.com/o/repo{i}"))
            .collect();
        assert_eq!(started, expected);
        shutdown.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_never_exceeds_its_concurrency_bound() {
        let tracking = TrackingAnalyzer::new(Duration::from_millis(80));
        let inner = tracking.inner.clone();
        let deps = deps_with(Arc::new(tracking));

        let mut job_ids = Vec::new();
        for i in 0..6 {
            let job = deps
                .queue
                .enqueue(&format!("https://github.com/o/repo{i}"), &format!("o-repo{i}"))
                .await
                .unwrap();
            job_ids.push(job.id);
        }

        let shutdown = CancellationToken::new();
        fast_pool(deps.clone(), 2).spawn(shutdown.clone());

        for id in &job_ids {
            wait_for_state(&deps, *id, JobState::Completed).await;
        }

        assert!(inner.peak_active.load(Ordering::SeqCst) <= 2);
        assert_eq!(inner.started.lock().unwrap().len(), 6);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn analyzer_hangup_without_terminal_event_fails_the_job() {
        // Script with only a progress event: channel closes with no terminal.
        let deps = deps_with(Arc::new(ScriptedAnalyzer::new(vec![
            ProgressEvent::Progress {
                message: "working".to_string(),
            },
        ])));
        let job = deps
            .queue
            .enqueue("https://github.com/a/b", "a-b")
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        fast_pool(deps.clone(), 1).spawn(shutdown.clone());

        let failed = wait_for_state(&deps, job.id, JobState::Failed).await;
        assert_eq!(failed.error.as_deref(), Some("analysis ended without a result"));
        shutdown.cancel();
    }
}
