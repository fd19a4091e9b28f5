pub mod config;
pub mod consumer;
pub mod error;
pub mod messaging;
pub mod models;
pub mod worker_processing;

pub use config::Config;
pub use consumer::{Consumer, ConsumerStats, PollOutcome};
pub use error::WorkerError;
pub use messaging::{JobQueue, MemoryQueue, RedisQueue};
pub use models::{Job, JobResult, JobStatus};
pub use worker_processing::{Executor, SimulatedWork, Work};
