//! Worker pool supervision.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use tfleet_queue::{Broker, QueueClient, QueueConfig, QueueResult};
use tfleet_storage::StorageContext;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::notifier::Notifier;
use crate::processor::ProcessorRegistry;
use crate::worker::Worker;

/// Starts `worker_count` independent workers, each with its own broker
/// connection, and keeps them running until shutdown.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: WorkerConfig,
    queue_config: QueueConfig,
    storage: StorageContext,
    notifier: Notifier,
    registry: ProcessorRegistry,
}

impl Supervisor {
    pub fn new(
        config: WorkerConfig,
        queue_config: QueueConfig,
        storage: StorageContext,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            queue_config,
            storage,
            notifier,
            registry: ProcessorRegistry::with_defaults(),
        }
    }

    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Run the pool until `shutdown` reads `true` and every worker stopped.
    ///
    /// `make_broker` is called once per worker with the worker index.
    pub async fn run<B, F>(&self, make_broker: F, shutdown: watch::Receiver<bool>) -> WorkerResult<()>
    where
        B: Broker,
        F: Fn(usize) -> QueueResult<B>,
    {
        info!(workers = self.config.worker_count, "Starting workers");
        let mut workers = JoinSet::new();

        for index in 0..self.config.worker_count {
            let broker = make_broker(index)?;
            let queue = Arc::new(QueueClient::new(broker, self.queue_config.clone()));
            let worker = Worker::new(
                format!("worker-{}", index),
                queue,
                self.notifier.clone(),
                self.storage.clone(),
                shutdown.clone(),
            )
            .with_registry(self.registry.clone())
            .with_config(self.config.clone());

            workers.spawn(keep_running(worker, self.config.restart_delay, shutdown.clone()));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("All workers stopped");
        Ok(())
    }
}

/// Run a worker's consume loop, restarting it after errors.
async fn keep_running<B: Broker>(worker: Worker<B>, restart_delay: Duration, shutdown: watch::Receiver<bool>) {
    loop {
        match worker.run().await {
            Ok(()) => break,
            Err(e) => {
                error!(worker = %worker.id(), error = %e, "Worker loop failed");
                if *shutdown.borrow() {
                    break;
                }
                tokio::time::sleep(restart_delay).await;
                info!(worker = %worker.id(), "Restarting worker loop");
            }
        }
    }
    info!(worker = %worker.id(), "Worker stopped");
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tfleet_models::{Job, JobUid, Params, QueueMessage};
    use tfleet_queue::{MemoryBroker, MemoryEventBus};

    use crate::test_support::storage_context;

    #[tokio::test]
    async fn test_pool_drains_shared_queue_and_stops() {
        let broker = MemoryBroker::new();
        let queue_config = QueueConfig {
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            reconnect_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let producer = QueueClient::new(broker.clone(), queue_config.clone());
        for n in 0..4 {
            // Unknown processors fail permanently, which is enough to drain
            let job = Job::new(JobUid::from_string(format!("u{}", n)), "image", Params::new());
            producer.push(&QueueMessage::new(job, "tfleet")).await.unwrap();
        }

        let bus = Arc::new(MemoryEventBus::new());
        let notifier = Notifier::new(reqwest::Client::new(), bus.clone(), "tfleet");
        let config = WorkerConfig {
            worker_count: 2,
            ..Default::default()
        };
        let supervisor = Supervisor::new(config, queue_config, storage_context().await, notifier)
            .with_registry(ProcessorRegistry::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn({
            let broker = broker.clone();
            async move { supervisor.run(|_| Ok(broker.clone()), shutdown_rx).await }
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let failed = bus
                .published()
                .iter()
                .filter(|(event, _)| event == "tfleet.failed")
                .count();
            if failed == 4 {
                break;
            }
            assert!(Instant::now() < deadline, "queue was not drained");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(true).unwrap();
        running.await.unwrap().unwrap();
        assert!(broker.ready().is_empty());
        assert_eq!(broker.unacked_count(), 0);
    }
}
