//! The consumer loop: poll, decode, dispatch, one job at a time.
//!
//! Job N+1 is not fetched until job N's result has been written (or lost).
//! Shutdown is cooperative and only observed between iterations; an in-flight
//! dequeue or execution is never interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::messaging::JobQueue;
use crate::models::{Job, JobResult};
use crate::worker_processing::{Executor, Work};

#[derive(Debug)]
pub enum PollOutcome {
  /// The wait expired with nothing queued.
  Idle,
  Executed(JobResult),
  /// Payload was not a job. It is gone from the queue.
  Discarded,
  /// Job ran but its result could not be written.
  ResultLost,
  /// Dequeue failed; the loop slept before returning.
  Backoff,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
  pub executed: u64,
  pub discarded: u64,
  pub results_lost: u64,
  pub poll_errors: u64,
}

impl ConsumerStats {
  fn record(&mut self, outcome: &PollOutcome) {
    match outcome {
      PollOutcome::Idle => {}
      PollOutcome::Executed(_) => self.executed += 1,
      PollOutcome::Discarded => self.discarded += 1,
      PollOutcome::ResultLost => self.results_lost += 1,
      PollOutcome::Backoff => self.poll_errors += 1,
    }
  }
}

pub struct Consumer<Q: ?Sized, W> {
  executor: Executor<Q, W>,
  queue_name: String,
  poll_timeout: Duration,
  error_backoff: Duration,
}

impl<Q, W> Consumer<Q, W>
where
  Q: JobQueue + ?Sized,
  W: Work,
{
  pub fn new(queue: Arc<Q>, work: W, config: &Config) -> Self {
    Self {
      executor: Executor::new(queue, work, config.worker_id.clone(), config.result_ttl),
      queue_name: config.queue_name.clone(),
      poll_timeout: config.poll_timeout,
      error_backoff: config.error_backoff,
    }
  }

  pub fn worker_id(&self) -> &str {
    self.executor.worker_id()
  }

  /// One pass through the state machine.
  pub async fn poll_once(&self) -> PollOutcome {
    let popped = self.executor.queue().pop(&self.queue_name, self.poll_timeout).await;
    let payload = match popped {
      Ok(Some(payload)) => payload,
      Ok(None) => return PollOutcome::Idle,
      Err(e) => {
        warn!("[{}] Error fetching job: {}", self.worker_id(), e);
        self.heartbeat().await;
        sleep(self.error_backoff).await;
        return PollOutcome::Backoff;
      }
    };

    let job = match Job::decode(&payload) {
      Ok(job) => job,
      Err(e) => {
        error!(
          "[{}] Failed to parse job, discarding {} byte payload: {}",
          self.worker_id(),
          payload.len(),
          e
        );
        return PollOutcome::Discarded;
      }
    };
    debug!("[{}] Dequeued subtask {:?}", self.worker_id(), job.subtask_id);

    match self.executor.execute(&job).await {
      Ok(result) => PollOutcome::Executed(result),
      Err(_) => PollOutcome::ResultLost,
    }
  }

  /// A failed pop alone cannot tell a blip from a dead broker, so ask.
  async fn heartbeat(&self) {
    match self.executor.queue().ping().await {
      Ok(()) => info!("[{}] Broker answered ping, resuming after backoff", self.worker_id()),
      Err(e) => error!("[{}] Broker unreachable: {}", self.worker_id(), e),
    }
  }

  /// Polls until `shutdown` reads `true`. The flag is checked before each
  /// poll, so the current iteration always runs to completion.
  pub async fn run(self, shutdown: watch::Receiver<bool>) -> ConsumerStats {
    info!("Worker {} started processing jobs from {}", self.worker_id(), self.queue_name);
    let mut stats = ConsumerStats::default();
    while !stop_requested(&shutdown) {
      let outcome = self.poll_once().await;
      stats.record(&outcome);
    }
    info!("Worker {} stopped polling: {:?}", self.worker_id(), stats);
    stats
  }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
  *shutdown.borrow()
}
