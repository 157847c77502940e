//! Event relay: per-job broadcast channels for live progress fan-out.
//!
//! Workers publish each job's progress events here; any number of streaming
//! connections subscribe by job id. Subscribers only see events published
//! after they attach — there is deliberately no replay buffer, which is why
//! the progress endpoint reports queue position from the queue itself before
//! attaching.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::jobs::ProgressEvent;

/// Thread-safe, cloneable pub/sub hub keyed by job id.
#[derive(Clone)]
pub struct StreamHub {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>>,
    capacity: usize,
}

impl StreamHub {
    /// Default capacity of 64 buffered events per channel; a lagging
    /// subscriber skips ahead rather than blocking the publisher.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish an event on a job's channel. No-op without subscribers.
    pub async fn publish(&self, job_id: Uuid, event: ProgressEvent) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(&job_id) {
            // Send errors mean no active receivers; nothing to do.
            let _ = tx.send(event);
        }
    }

    /// Subscribe to a job's channel, creating it on demand. Attaching before
    /// any event has been published is valid.
    pub async fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Live subscriber count for a job's channel.
    pub async fn subscriber_count(&self, job_id: Uuid) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(&job_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Remove channels with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}
