use std::env;
use std::time::Duration;

pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_WORKER_ID: &str = "worker-1";
pub const WORK_QUEUE: &str = "work_queue";

const RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Config {
  pub redis_host: String,
  pub redis_port: u16,
  pub worker_id: String,
  pub queue_name: String,
  pub result_ttl: Duration,
  pub poll_timeout: Duration,
  pub error_backoff: Duration,
  pub connect_timeout: Duration,
  pub shutdown_grace: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      redis_host: DEFAULT_REDIS_HOST.into(),
      redis_port: DEFAULT_REDIS_PORT,
      worker_id: DEFAULT_WORKER_ID.into(),
      queue_name: WORK_QUEUE.into(),
      result_ttl: RESULT_TTL,
      poll_timeout: POLL_TIMEOUT,
      error_backoff: ERROR_BACKOFF,
      connect_timeout: CONNECT_TIMEOUT,
      shutdown_grace: SHUTDOWN_GRACE,
    }
  }
}

impl Config {
  pub fn from_env() -> Self {
    Self::from_lookup(|key| env::var(key).ok())
  }

  /// Empty values count as unset.
  pub fn from_lookup<F>(lookup: F) -> Self
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
    Self {
      redis_host: get("REDIS_HOST").unwrap_or_else(|| DEFAULT_REDIS_HOST.into()),
      redis_port: get("REDIS_PORT")
        .and_then(|port| port.parse().ok())
        .unwrap_or(DEFAULT_REDIS_PORT),
      worker_id: get("WORKER_ID").unwrap_or_else(|| DEFAULT_WORKER_ID.into()),
      ..Self::default()
    }
  }

  pub fn redis_addr(&self) -> String {
    format!("{}:{}", self.redis_host, self.redis_port)
  }

  pub fn redis_url(&self) -> String {
    format!("redis://{}/0", self.redis_addr())
  }
}
