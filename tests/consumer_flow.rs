use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};

use rqworker::{Config, Consumer, ConsumerStats, Job, JobQueue, JobResult, MemoryQueue, PollOutcome, SimulatedWork, Work};

const QUEUE: &str = "work_queue";

fn config(worker_id: &str) -> Config {
  Config {
    worker_id: worker_id.into(),
    ..Config::default()
  }
}

async fn stored(queue: &MemoryQueue, key: &str) -> Option<Value> {
  let raw = assert_ok!(queue.get(key).await)?;
  Some(serde_json::from_slice(&raw).expect("stored result is JSON"))
}

#[tokio::test(start_paused = true)]
async fn demo_job_produces_completed_result() {
  let queue = Arc::new(MemoryQueue::new());
  assert_ok!(queue.push(QUEUE, br#"{"task_id":"T1","subtask_id":"S1","description":"demo","priority":0}"#).await);

  let consumer = Consumer::new(queue.clone(), SimulatedWork::default(), &config("worker-e2e"));
  assert!(matches!(consumer.poll_once().await, PollOutcome::Executed(_)));

  let result = stored(&queue, "result:S1").await.expect("result:S1 written");
  assert_eq!(result["status"], "completed");
  assert_eq!(result["worker_id"], "worker-e2e");
  assert_eq!(result["description"], "demo");
  assert_eq!(result["task_id"], "T1");
  assert_eq!(result["subtask_id"], "S1");
  assert!(result["completed_at"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test(start_paused = true)]
async fn invalid_payload_is_logged_and_skipped() {
  let queue = Arc::new(MemoryQueue::new());
  assert_ok!(queue.push(QUEUE, b"not-json").await);
  assert_ok!(queue.push(QUEUE, br#"{"task_id":"T1","subtask_id":"S2","description":"after","priority":0}"#).await);

  let consumer = Consumer::new(queue.clone(), SimulatedWork::default(), &config("worker-1"));
  assert!(matches!(consumer.poll_once().await, PollOutcome::Discarded));
  assert!(queue.keys().is_empty());

  assert!(matches!(consumer.poll_once().await, PollOutcome::Executed(_)));
  assert_eq!(queue.keys(), vec!["result:S2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn result_expires_after_ttl() {
  let queue = Arc::new(MemoryQueue::new());
  let config = Config {
    result_ttl: Duration::from_secs(10),
    ..config("worker-1")
  };
  assert_ok!(queue.push(QUEUE, br#"{"subtask_id":"S1","priority":0}"#).await);
  let consumer = Consumer::new(queue.clone(), SimulatedWork::default(), &config);
  assert!(matches!(consumer.poll_once().await, PollOutcome::Executed(_)));

  tokio::time::advance(Duration::from_millis(9_999)).await;
  assert!(stored(&queue, "result:S1").await.is_some());

  tokio::time::advance(Duration::from_millis(1)).await;
  assert!(stored(&queue, "result:S1").await.is_none());
  assert!(queue.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_drains_queue_until_shutdown() {
  let queue = Arc::new(MemoryQueue::new());
  for idx in 0..3 {
    let job = Job {
      task_id: "T1".into(),
      subtask_id: format!("T1-{}", idx),
      description: format!("step {}", idx),
      priority: idx,
    };
    assert_ok!(queue.push(QUEUE, &serde_json::to_vec(&job).unwrap()).await);
  }
  assert_ok!(queue.push(QUEUE, b"{broken").await);

  let (shutdown, rx) = watch::channel(false);
  let consumer = Consumer::new(queue.clone(), SimulatedWork::default(), &config("worker-1"));
  let handle = tokio::spawn(consumer.run(rx));

  // 1s + 2s + 3s of simulated work, plus a few idle polls.
  tokio::time::sleep(Duration::from_secs(10)).await;
  shutdown.send(true).unwrap();
  let stats = handle.await.unwrap();

  assert_eq!(stats, ConsumerStats { executed: 3, discarded: 1, results_lost: 0, poll_errors: 0 });
  assert_eq!(queue.keys(), vec!["result:T1-0", "result:T1-1", "result:T1-2"]);
}

#[tokio::test(start_paused = true)]
async fn loop_survives_broker_outage() {
  let queue = Arc::new(MemoryQueue::new());
  queue.set_offline(true);

  let (shutdown, rx) = watch::channel(false);
  let consumer = Consumer::new(queue.clone(), SimulatedWork::default(), &config("worker-1"));
  let handle = tokio::spawn(consumer.run(rx));

  tokio::time::sleep(Duration::from_secs(5)).await;
  queue.set_offline(false);
  assert_ok!(queue.push(QUEUE, br#"{"subtask_id":"S1"}"#).await);
  tokio::time::sleep(Duration::from_secs(5)).await;
  shutdown.send(true).unwrap();

  let stats = handle.await.unwrap();
  assert!(stats.poll_errors >= 2);
  assert_eq!(stats.executed, 1);
  assert!(stored(&queue, "result:S1").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn two_consumers_never_share_an_item() {
  let queue = Arc::new(MemoryQueue::new());
  let total = 20;
  for idx in 0..total {
    let payload = format!(r#"{{"task_id":"T1","subtask_id":"S{}","description":"d","priority":0}}"#, idx);
    assert_ok!(queue.push(QUEUE, payload.as_bytes()).await);
  }

  let (shutdown, rx) = watch::channel(false);
  let first = tokio::spawn(Consumer::new(queue.clone(), SimulatedWork::default(), &config("worker-a")).run(rx.clone()));
  let second = tokio::spawn(Consumer::new(queue.clone(), SimulatedWork::default(), &config("worker-b")).run(rx));

  tokio::time::sleep(Duration::from_secs(30)).await;
  shutdown.send(true).unwrap();
  let a = first.await.unwrap();
  let b = second.await.unwrap();

  assert_eq!(a.executed + b.executed, total);
  assert!(a.executed > 0 && b.executed > 0);
  assert!(queue.is_empty(QUEUE));

  let keys: HashSet<String> = queue.keys().into_iter().collect();
  assert_eq!(keys.len() as u64, total);
  let mut by_worker = (0u64, 0u64);
  for key in &keys {
    let result: JobResult = serde_json::from_slice(&queue.get(key).await.unwrap().unwrap()).unwrap();
    match result.worker_id.as_str() {
      "worker-a" => by_worker.0 += 1,
      "worker-b" => by_worker.1 += 1,
      other => panic!("unexpected worker {}", other),
    }
  }
  assert_eq!(by_worker, (a.executed, b.executed));
}

#[derive(Clone, Default)]
struct Recorder {
  seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Work for Recorder {
  async fn perform(&self, job: &Job) {
    self.seen.lock().unwrap().push(job.subtask_id.clone());
  }
}

#[tokio::test(start_paused = true)]
async fn work_step_is_pluggable() {
  let queue = Arc::new(MemoryQueue::new());
  let recorder = Recorder::default();
  assert_ok!(queue.push(QUEUE, br#"{"subtask_id":"A"}"#).await);
  assert_ok!(queue.push(QUEUE, br#"{"subtask_id":"B"}"#).await);

  let consumer = Consumer::new(queue.clone(), recorder.clone(), &config("worker-1"));
  consumer.poll_once().await;
  consumer.poll_once().await;

  assert_eq!(*recorder.seen.lock().unwrap(), vec!["A", "B"]);
  assert_eq!(queue.keys(), vec!["result:A", "result:B"]);
}

#[tokio::test(start_paused = true)]
async fn offline_store_rejects_writes() {
  let queue = MemoryQueue::new();
  queue.set_offline(true);
  assert_err!(queue.set_with_expiry("result:S1", b"{}", Duration::from_secs(1)).await);
}
