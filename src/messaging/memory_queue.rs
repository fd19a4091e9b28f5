use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::JobQueue;
use crate::error::WorkerError;

/// In-process broker with the same contract as Redis: pops are atomic, values
/// expire on a clock that follows `tokio::time`, so paused-time tests can
/// step over a TTL.
///
/// Failures can be injected to drive the consumer's error paths.
#[derive(Default)]
pub struct MemoryQueue {
  state: Mutex<State>,
  pushed: Notify,
}

#[derive(Default)]
struct State {
  lists: HashMap<String, VecDeque<Vec<u8>>>,
  values: HashMap<String, (Vec<u8>, Instant)>,
  failing_pops: usize,
  failing_writes: bool,
  offline: bool,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self, queue: &str) -> usize {
    self.lock().lists.get(queue).map_or(0, VecDeque::len)
  }

  pub fn is_empty(&self, queue: &str) -> bool {
    self.len(queue) == 0
  }

  /// Live (unexpired) keys, sorted.
  pub fn keys(&self) -> Vec<String> {
    let now = Instant::now();
    let state = self.lock();
    let mut keys: Vec<String> = state
      .values
      .iter()
      .filter(|(_, (_, expires_at))| *expires_at > now)
      .map(|(key, _)| key.clone())
      .collect();
    keys.sort();
    keys
  }

  /// The next `count` pops fail with a connection error.
  pub fn fail_pops(&self, count: usize) {
    self.lock().failing_pops = count;
  }

  pub fn fail_writes(&self, failing: bool) {
    self.lock().failing_writes = failing;
  }

  /// While offline every operation, ping included, reports a connection error.
  pub fn set_offline(&self, offline: bool) {
    self.lock().offline = offline;
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, State> {
    // A panicked test thread must not wedge the others.
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn check_online(state: &State) -> Result<(), WorkerError> {
    if state.offline {
      return Err(WorkerError::Connection("connection refused".into()));
    }
    Ok(())
  }
}

#[async_trait]
impl JobQueue for MemoryQueue {
  async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, WorkerError> {
    let deadline = Instant::now() + timeout;
    loop {
      let notified = self.pushed.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      {
        let mut state = self.lock();
        Self::check_online(&state)?;
        if state.failing_pops > 0 {
          state.failing_pops -= 1;
          return Err(WorkerError::Connection("connection reset by peer".into()));
        }
        if let Some(payload) = state.lists.get_mut(queue).and_then(|list| list.pop_back()) {
          return Ok(Some(payload));
        }
      }

      if tokio::time::timeout_at(deadline, notified).await.is_err() {
        return Ok(None);
      }
    }
  }

  async fn push(&self, queue: &str, payload: &[u8]) -> Result<(), WorkerError> {
    {
      let mut state = self.lock();
      Self::check_online(&state)?;
      state.lists.entry(queue.to_string()).or_default().push_front(payload.to_vec());
    }
    self.pushed.notify_waiters();
    Ok(())
  }

  async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), WorkerError> {
    let mut state = self.lock();
    Self::check_online(&state)?;
    if state.failing_writes {
      return Err(WorkerError::Store { key: key.to_string(), reason: "write rejected".into() });
    }
    state.values.insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, WorkerError> {
    let mut state = self.lock();
    Self::check_online(&state)?;
    let expired = match state.values.get(key) {
      Some((_, expires_at)) => *expires_at <= Instant::now(),
      None => return Ok(None),
    };
    if expired {
      state.values.remove(key);
      return Ok(None);
    }
    Ok(state.values.get(key).map(|(value, _)| value.clone()))
  }

  async fn ping(&self) -> Result<(), WorkerError> {
    Self::check_online(&self.lock())
  }
}
