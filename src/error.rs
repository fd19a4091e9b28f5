use thiserror::Error;

/// Failures the worker can observe. None of these escape the consumer loop;
/// they are reported through logging and the loop moves on.
#[derive(Debug, Error)]
pub enum WorkerError {
  /// Queue or store unreachable. Recovered by backing off and re-polling.
  #[error("queue connection error: {0}")]
  Connection(String),

  /// Payload did not match the job schema. The item is already off the queue
  /// and is dropped: there is no dead-letter path.
  #[error("malformed job payload: {0}")]
  Decode(#[source] serde_json::Error),

  /// Result could not be written. The result is lost, no retry.
  #[error("failed to store result under {key}: {reason}")]
  Store { key: String, reason: String },

  #[error("failed to serialize result: {0}")]
  Serialization(#[source] serde_json::Error),
}

impl WorkerError {
  pub fn is_transient(&self) -> bool {
    matches!(self, WorkerError::Connection(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_connection_errors_are_transient() {
    assert!(WorkerError::Connection("refused".into()).is_transient());
    let store = WorkerError::Store { key: "result:S1".into(), reason: "READONLY".into() };
    assert!(!store.is_transient());
    let decode = serde_json::from_str::<u32>("x").unwrap_err();
    assert!(!WorkerError::Decode(decode).is_transient());
  }

  #[test]
  fn store_error_names_the_key() {
    let err = WorkerError::Store { key: "result:S9".into(), reason: "timed out".into() };
    assert_eq!(err.to_string(), "failed to store result under result:S9: timed out");
  }
}
