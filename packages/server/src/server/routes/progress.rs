//! Live progress streaming over Server-Sent Events.
//!
//! One long-lived GET per job. The stream carries the job's progress events
//! as JSON payloads and ends after the terminal event. Subscription happens
//! before the initial position report, so no event can fall between the two.
//! While the job waits in the queue, its position is re-polled on an interval
//! and pushed as fresh `queued` events.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::kernel::deps::ServerDeps;
use crate::kernel::jobs::{JobState, ProgressEvent};
use crate::server::app::AppState;

/// How often a waiting job's queue position is re-reported.
const POSITION_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// GET /api/progress/:job_id
///
/// Unknown or already-terminal jobs get a single explanatory `error` event;
/// events are not replayed, so a reconnect after completion is pointed at
/// the article endpoint instead.
pub async fn progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<ProgressEvent>(16);

    match job_id.parse::<Uuid>() {
        Ok(job_id) => {
            tokio::spawn(stream_job(state.deps.clone(), job_id, tx));
        }
        Err(_) => {
            let _ = tx.send(ProgressEvent::error("Unknown job")).await;
        }
    }

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok(Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn stream_job(deps: Arc<ServerDeps>, job_id: Uuid, tx: mpsc::Sender<ProgressEvent>) {
    let job = match deps.queue.get(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            let _ = tx.send(ProgressEvent::error("Unknown job")).await;
            return;
        }
        Err(e) => {
            let _ = tx.send(ProgressEvent::error(e.to_string())).await;
            return;
        }
    };

    // Terminal jobs get a single explanatory event; there is no replay.
    match job.state {
        JobState::Completed => {
            let _ = tx
                .send(ProgressEvent::error(format!(
                    "This analysis already finished. Fetch the result from /api/article/{}",
                    job.slug
                )))
                .await;
            return;
        }
        JobState::Failed => {
            let reason = job
                .error
                .unwrap_or_else(|| "Analysis failed".to_string());
            let _ = tx.send(ProgressEvent::error(reason)).await;
            return;
        }
        JobState::Waiting | JobState::Active => {}
    }

    // Subscribe before reporting the initial position: anything published
    // from here on is captured by the receiver.
    let mut events = deps.hub.subscribe(job_id).await;

    // Only still-waiting jobs get a position report; an active job's next
    // event comes from the worker.
    if job.state == JobState::Waiting {
        let position = deps.queue.position_of(job_id).await.unwrap_or(0);
        if tx.send(ProgressEvent::queued(position)).await.is_err() {
            return;
        }
    }

    let mut poll = tokio::time::interval(POSITION_POLL_INTERVAL);
    poll.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            // Client went away: drop our receiver so the channel can be
            // cleaned up, and stop forwarding.
            _ = tx.closed() => {
                debug!(%job_id, "progress stream client disconnected");
                return;
            }
            received = events.recv() => {
                match received {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        if tx.send(event).await.is_err() {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                    // Lagged: skipped ahead past missed events, keep going.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
            _ = poll.tick() => {
                if let Err(terminal) = report_position(&deps, job_id, &tx).await {
                    if terminal {
                        return;
                    }
                }
            }
        }
    }
}

/// Push a fresh position while the job waits. Returns `Err(true)` when the
/// stream should end: the job reached a terminal state between events (the
/// worker published the terminal event before we subscribed), or the client
/// disconnected.
async fn report_position(
    deps: &ServerDeps,
    job_id: Uuid,
    tx: &mpsc::Sender<ProgressEvent>,
) -> Result<(), bool> {
    let job = match deps.queue.get(job_id).await {
        Ok(Some(job)) => job,
        _ => return Err(false),
    };

    match job.state {
        JobState::Waiting => {
            let position = deps.queue.position_of(job_id).await.unwrap_or(0);
            if tx.send(ProgressEvent::queued(position)).await.is_err() {
                return Err(true);
            }
            Ok(())
        }
        JobState::Active => Ok(()),
        // Terminal without a relayed event (the publish raced our
        // subscription): point at the article endpoint rather than inlining
        // the result, same as a late reconnect.
        JobState::Completed => {
            let _ = tx
                .send(ProgressEvent::error(format!(
                    "This analysis already finished. Fetch the result from /api/article/{}",
                    job.slug
                )))
                .await;
            Err(true)
        }
        JobState::Failed => {
            let reason = job.error.unwrap_or_else(|| "Analysis failed".to_string());
            let _ = tx.send(ProgressEvent::error(reason)).await;
            Err(true)
        }
    }
}
