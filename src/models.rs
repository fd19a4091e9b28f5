use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::WorkerError;

/// One unit of requested work as it sits on the queue.
///
/// Missing or null fields decode to their empty value, so a job without a
/// `subtask_id` still runs and produces a result keyed `result:`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
  #[serde(deserialize_with = "null_as_default")]
  pub task_id: String,
  #[serde(deserialize_with = "null_as_default")]
  pub subtask_id: String,
  #[serde(deserialize_with = "null_as_default")]
  pub description: String,
  #[serde(deserialize_with = "null_as_default")]
  pub priority: u32,
}

impl Job {
  /// A bare `null` payload is an empty job, not a decode failure.
  pub fn decode(payload: &[u8]) -> Result<Self, WorkerError> {
    serde_json::from_slice::<Option<Job>>(payload)
      .map(Option::unwrap_or_default)
      .map_err(WorkerError::Decode)
  }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Completed,
}

/// Outcome record written back to the store after a job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
  pub subtask_id: String,
  pub task_id: String,
  pub status: JobStatus,
  pub worker_id: String,
  #[serde(with = "rfc3339_seconds")]
  pub completed_at: DateTime<Utc>,
  pub description: String,
}

impl JobResult {
  pub fn completed(job: &Job, worker_id: &str, completed_at: DateTime<Utc>) -> Self {
    Self {
      subtask_id: job.subtask_id.clone(),
      task_id: job.task_id.clone(),
      status: JobStatus::Completed,
      worker_id: worker_id.to_string(),
      completed_at,
      description: job.description.clone(),
    }
  }

  pub fn key(&self) -> String {
    Self::result_key(&self.subtask_id)
  }

  pub fn result_key(subtask_id: &str) -> String {
    format!("result:{}", subtask_id)
  }

  pub fn encode(&self) -> Result<Vec<u8>, WorkerError> {
    serde_json::to_vec(self).map_err(WorkerError::Serialization)
  }
}

/// `2024-05-01T12:00:00Z`: whole seconds, always UTC.
mod rfc3339_seconds {
  use chrono::{DateTime, SecondsFormat, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(serde::de::Error::custom)
  }
}
