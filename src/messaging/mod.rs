use std::time::Duration;

use async_trait::async_trait;

use crate::error::WorkerError;

mod memory_queue;
mod redis_queue;

pub use memory_queue::MemoryQueue;
pub use redis_queue::{connect, RedisQueue};

/// The two capabilities the worker needs from its broker, plus the producer
/// and reader side used to feed and inspect it.
///
/// Implementations are shared by `Arc` between the consumer task and the
/// main control path, so they must be safe for concurrent use without
/// external locking.
#[async_trait]
pub trait JobQueue: Send + Sync {
  /// Blocking pop from the tail of `queue`. `Ok(None)` means the wait
  /// expired with nothing available, which is not an error.
  async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, WorkerError>;

  /// Push onto the head of `queue`, so items come out in FIFO order.
  async fn push(&self, queue: &str, payload: &[u8]) -> Result<(), WorkerError>;

  async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), WorkerError>;

  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, WorkerError>;

  async fn ping(&self) -> Result<(), WorkerError>;
}
