// Background job orchestration: admission queue + worker pool.

pub mod job;
pub mod queue;
pub mod worker;

pub use job::{Job, JobState, ProgressEvent};
pub use queue::{AdmissionQueue, InMemoryQueue, PgAdmissionQueue};
pub use worker::{WorkerConfig, WorkerPool};
