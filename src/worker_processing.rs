use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{error, info};

use crate::error::WorkerError;
use crate::messaging::JobQueue;
use crate::models::{Job, JobResult};

/// The "do the work" step. Swap in real execution here; the executor only
/// cares that it returns once the job is done.
#[async_trait]
pub trait Work: Send + Sync {
  async fn perform(&self, job: &Job);
}

/// Stands in for real work: sleeps `base + per_priority * priority`.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
  pub base: Duration,
  pub per_priority: Duration,
}

impl Default for SimulatedWork {
  fn default() -> Self {
    Self {
      base: Duration::from_secs(1),
      per_priority: Duration::from_secs(1),
    }
  }
}

impl SimulatedWork {
  pub fn duration(&self, priority: u32) -> Duration {
    self.per_priority
      .checked_mul(priority)
      .and_then(|scaled| self.base.checked_add(scaled))
      .unwrap_or(Duration::MAX)
  }
}

#[async_trait]
impl Work for SimulatedWork {
  async fn perform(&self, job: &Job) {
    sleep(self.duration(job.priority)).await;
  }
}

pub struct Executor<Q: ?Sized, W> {
  queue: Arc<Q>,
  work: W,
  worker_id: String,
  result_ttl: Duration,
}

impl<Q, W> Executor<Q, W>
where
  Q: JobQueue + ?Sized,
  W: Work,
{
  pub fn new(queue: Arc<Q>, work: W, worker_id: impl Into<String>, result_ttl: Duration) -> Self {
    Self {
      queue,
      work,
      worker_id: worker_id.into(),
      result_ttl,
    }
  }

  pub fn worker_id(&self) -> &str {
    &self.worker_id
  }

  pub fn queue(&self) -> &Arc<Q> {
    &self.queue
  }

  /// Runs the job and records its result. A failed write is logged and
  /// handed back; the result is not retried.
  pub async fn execute(&self, job: &Job) -> Result<JobResult, WorkerError> {
    info!("[{}] Processing: {} (Task: {})", self.worker_id, job.description, job.task_id);
    self.work.perform(job).await;

    let result = JobResult::completed(job, &self.worker_id, Utc::now());
    if let Err(e) = self.store(&result).await {
      error!("[{}] Failed to store result for subtask {:?}: {}", self.worker_id, job.subtask_id, e);
      return Err(e);
    }

    info!("[{}] Completed: {}", self.worker_id, job.description);
    Ok(result)
  }

  async fn store(&self, result: &JobResult) -> Result<(), WorkerError> {
    let payload = result.encode()?;
    self.queue.set_with_expiry(&result.key(), &payload, self.result_ttl).await
  }
}
