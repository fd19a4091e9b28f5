use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rqworker::config::Config;
use rqworker::consumer::Consumer;
use rqworker::messaging::connect;
use rqworker::worker_processing::SimulatedWork;

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = Config::from_env();
  let queue = connect(&config)
    .await
    .with_context(|| format!("failed to connect to Redis at {}", config.redis_addr()))?;
  let queue = Arc::new(queue);

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let consumer = Consumer::new(queue.clone(), SimulatedWork::default(), &config);
  let mut consumer_task = tokio::spawn(consumer.run(shutdown_rx));

  let received = shutdown_signal().await;
  info!("Received {}, shutting down gracefully...", received);
  let _ = shutdown_tx.send(true);

  // The current iteration may still be blocked in a pop or a job. Give it a
  // moment, then abandon it.
  match tokio::time::timeout(config.shutdown_grace, &mut consumer_task).await {
    Ok(Ok(stats)) => info!("Consumer finished: {:?}", stats),
    Ok(Err(e)) => error!("Consumer task failed: {}", e),
    Err(_) => {
      warn!("Consumer still busy after {:?}, abandoning in-flight job", config.shutdown_grace);
      consumer_task.abort();
      let _ = consumer_task.await;
    }
  }

  // Last handle; dropping it closes the connection.
  drop(queue);
  info!("Worker shutdown complete");
  Ok(())
}

async fn shutdown_signal() -> &'static str {
  let interrupt = async {
    if let Err(e) = signal::ctrl_c().await {
      error!("Failed to listen for SIGINT: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(e) => {
        error!("Failed to listen for SIGTERM: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = interrupt => "SIGINT",
    _ = terminate => "SIGTERM",
  }
}
