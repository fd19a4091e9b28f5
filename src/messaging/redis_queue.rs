use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::FromRedisValue;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{info, warn};

use super::JobQueue;
use crate::config::Config;
use crate::error::WorkerError;

static MAX_RETRIES: usize = 5;
// 2^n * 50ms: 100ms, 200ms, 400ms, 800ms, then capped.
static BACKOFF_BASE: u64 = 2;
static BACKOFF_FACTOR: u64 = 50;
static MAX_DELAY: Duration = Duration::from_secs(1);

/// Redis-backed queue and result store. `ConnectionManager` multiplexes a
/// single connection and reconnects on its own, so clones share it.
///
/// Every command carries a reply deadline. BRPOP gets its own wait on top,
/// so a broker that stops answering shows up as a connection error instead
/// of an endless idle poll.
#[derive(Clone)]
pub struct RedisQueue {
  conn: ConnectionManager,
  response_timeout: Duration,
}

fn retry_delays() -> impl Iterator<Item = Duration> {
  ExponentialBackoff::from_millis(BACKOFF_BASE)
    .factor(BACKOFF_FACTOR)
    .max_delay(MAX_DELAY)
    .take(MAX_RETRIES)
}

/// Opens the connection and proves it with a PING. Any failure here is fatal
/// to the caller: the worker must not start without its broker. Attempts are
/// capped at `connect_timeout` each, so giving up takes seconds.
pub async fn connect(config: &Config) -> Result<RedisQueue, WorkerError> {
  let client = redis::Client::open(config.redis_url()).map_err(connection_error)?;
  let connect_timeout = config.connect_timeout;

  let conn = Retry::spawn(retry_delays(), || {
    let client = client.clone();
    async move {
      match tokio::time::timeout(connect_timeout, ConnectionManager::new(client)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => {
          warn!("Redis connection attempt failed: {}", e);
          Err(connection_error(e))
        }
        Err(_) => {
          warn!("Redis connection attempt timed out after {:?}", connect_timeout);
          Err(WorkerError::Connection(format!("timed out after {:?}", connect_timeout)))
        }
      }
    }
  })
    .await?;

  let queue = RedisQueue {
    conn,
    response_timeout: config.connect_timeout,
  };
  queue.ping().await?;
  info!("Worker {} connected to Redis at {}", config.worker_id, config.redis_addr());
  Ok(queue)
}

fn connection_error(e: redis::RedisError) -> WorkerError {
  WorkerError::Connection(e.to_string())
}

/// BRPOP takes whole seconds; servers before 6.0 reject fractions and 0
/// means block forever.
fn brpop_seconds(timeout: Duration) -> u64 {
  timeout.as_secs().max(1)
}

impl RedisQueue {
  async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd, name: &str, limit: Duration) -> Result<T, WorkerError> {
    let mut conn = self.conn.clone();
    match tokio::time::timeout(limit, cmd.query_async(&mut conn)).await {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(e)) => Err(connection_error(e)),
      Err(_) => Err(WorkerError::Connection(format!("no reply to {} within {:?}", name, limit))),
    }
  }
}

#[async_trait]
impl JobQueue for RedisQueue {
  async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, WorkerError> {
    let wait = brpop_seconds(timeout);
    let mut cmd = redis::cmd("BRPOP");
    cmd.arg(queue).arg(wait);
    // A nil reply is the timeout; it never comes back as an error.
    let popped: Option<(String, Vec<u8>)> = self
      .query(&cmd, "BRPOP", Duration::from_secs(wait) + self.response_timeout)
      .await?;
    Ok(popped.map(|(_, payload)| payload))
  }

  async fn push(&self, queue: &str, payload: &[u8]) -> Result<(), WorkerError> {
    let mut cmd = redis::cmd("LPUSH");
    cmd.arg(queue).arg(payload);
    let _: i64 = self.query(&cmd, "LPUSH", self.response_timeout).await?;
    Ok(())
  }

  async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), WorkerError> {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value).arg("PX").arg(ttl.as_millis() as u64);
    self
      .query::<()>(&cmd, "SET", self.response_timeout)
      .await
      .map_err(|e| WorkerError::Store { key: key.to_string(), reason: e.to_string() })
  }

  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, WorkerError> {
    let mut cmd = redis::cmd("GET");
    cmd.arg(key);
    self.query(&cmd, "GET", self.response_timeout).await
  }

  async fn ping(&self) -> Result<(), WorkerError> {
    let _: String = self.query(&redis::cmd("PING"), "PING", self.response_timeout).await?;
    Ok(())
  }
}
