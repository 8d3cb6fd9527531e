//! Job execution.
//!
//! A [`Worker`] consumes its queue one message at a time. Each job moves
//! through `started`, then exactly one of `completed`, `canceled`,
//! `failed_will_retry` (republished as a new message) or `failed`.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use tfleet_models::{Job, JobEvent, Params, QueueMessage};
use tfleet_queue::{Broker, QueueClient};
use tfleet_storage::StorageContext;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::notifier::Notifier;
use crate::processor::{ProcessorContext, ProcessorRegistry, ProgressReporter};
use crate::retry::{classify, Disposition};

/// How a dispatched job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Canceled,
    Retried,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Canceled => "canceled",
            Outcome::Retried => "retried",
            Outcome::Failed => "failed",
        }
    }
}

pub struct Worker<B> {
    id: String,
    queue: Arc<QueueClient<B>>,
    registry: ProcessorRegistry,
    notifier: Notifier,
    storage: StorageContext,
    config: WorkerConfig,
    cancel: watch::Receiver<bool>,
}

impl<B: Broker> Worker<B> {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<QueueClient<B>>,
        notifier: Notifier,
        storage: StorageContext,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            registry: ProcessorRegistry::with_defaults(),
            notifier,
            storage,
            config: WorkerConfig::default(),
            cancel,
        }
    }

    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Consume jobs until cancelled.
    ///
    /// Returns the error of a job that could not be settled; its message has
    /// been put back on the queue.
    pub async fn run(&self) -> WorkerResult<()> {
        tracing::info!(worker = %self.id, "Worker consuming");
        self.queue
            .consume(
                |message: QueueMessage| async move { self.dispatch(message.into_job()).await.map(|_| ()) },
                self.cancel.clone(),
            )
            .await
    }

    /// Run one job through its lifecycle.
    ///
    /// Every job failure is settled here by notification and, for retries,
    /// republishing. An error is returned only when the retry could not be
    /// republished.
    pub async fn dispatch(&self, mut job: Job) -> WorkerResult<Outcome> {
        let logger = JobLogger::new(&self.id, &job);
        let span = logger.span();

        let outcome = async {
            logger.log_start(&format!("retries left {}", job.retries_left()));
            self.notifier.notify(&job, JobEvent::Started, Params::new()).await;

            let started = Instant::now();
            let result = self.execute(&job, &logger).await;

            match result {
                Ok(data) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    logger.log_completion(elapsed);
                    let mut payload = Params::new();
                    payload.insert("time_taken".into(), json!(elapsed));
                    payload.extend(data);
                    self.notifier.notify(&job, JobEvent::Completed, payload).await;
                    Ok(Outcome::Completed)
                }
                Err(error) => self.settle_failure(&mut job, error, &logger).await,
            }
        }
        .instrument(span)
        .await;

        if let Ok(outcome) = &outcome {
            metrics::counter!("tfleet_jobs_total", "outcome" => outcome.as_str()).increment(1);
        }
        outcome
    }

    async fn settle_failure(
        &self,
        job: &mut Job,
        error: WorkerError,
        logger: &JobLogger,
    ) -> WorkerResult<Outcome> {
        let reason = error.reason();
        if let WorkerError::Command(command_error) = &error {
            if let Some(output) = command_error.output() {
                logger.log_warning(&format!("Command output:\n{}", output));
            }
        }

        match classify(&error, job.retries_left()) {
            Disposition::Cancel => {
                logger.log_error("Job interrupted");
                self.notifier
                    .notify(job, JobEvent::Canceled, reason_data("Cancelled"))
                    .await;
                Ok(Outcome::Canceled)
            }
            Disposition::Retry => {
                job.consume_retry();
                logger.log_error(&format!(
                    "Job failed with {} error: {}, will retry ({} left)",
                    error.class(),
                    reason,
                    job.retries_left()
                ));
                self.notifier
                    .notify(job, JobEvent::FailedWillRetry, reason_data(&reason))
                    .await;
                let message = QueueMessage::new(job.clone(), self.notifier.namespace());
                self.queue.push(&message).await?;
                Ok(Outcome::Retried)
            }
            Disposition::Fail => {
                if error.is_timeout() {
                    logger.log_error("The job failed due to timeout");
                } else if let WorkerError::Resource(resource_error) = &error {
                    logger.log_error(&format!("The job failed due to resource: {}", resource_error));
                } else {
                    logger.log_error(&format!("Job permanently failed: {}", reason));
                }
                self.notifier
                    .notify(job, JobEvent::Failed, reason_data(&reason))
                    .await;
                Ok(Outcome::Failed)
            }
        }
    }

    /// Validate, look up the processor and run it, turning its progress
    /// reports into throttled notifications.
    async fn execute(&self, job: &Job, logger: &JobLogger) -> WorkerResult<Params> {
        let job_type = job.validate()?;
        let processor = self.registry.get(job_type)?;

        let mut cancel = self.cancel.clone();
        if *cancel.borrow_and_update() {
            return Err(WorkerError::Cancelled);
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let ctx = ProcessorContext::new(
            self.storage.clone(),
            ProgressReporter::new(progress_tx),
            self.cancel.clone(),
        )
        .with_ffmpeg_threads(self.config.ffmpeg_threads);

        let execution = processor.execute(job.params(), &ctx);
        tokio::pin!(execution);

        let mut next_progress = Instant::now() + self.config.progress_interval;
        loop {
            tokio::select! {
                result = &mut execution => return result,
                Some(fraction) = progress_rx.recv() => {
                    if Instant::now() >= next_progress {
                        next_progress = Instant::now() + self.config.progress_interval;
                        logger.log_progress(fraction);
                        let mut data = Params::new();
                        data.insert("progress".into(), json!(fraction));
                        self.notifier.notify(job, JobEvent::Progress, data).await;
                    }
                }
                _ = wait_for_cancel(&mut cancel) => return Err(WorkerError::Cancelled),
            }
        }
    }
}

fn reason_data(reason: &str) -> Params {
    let mut data = Params::new();
    data.insert("reason".into(), json!(reason));
    data
}

/// Resolves once `rx` reads `true`. Never resolves if the sender is gone.
async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use tfleet_models::{JobType, JobUid};
    use tfleet_queue::{MemoryBroker, MemoryEventBus, QueueConfig};
    use tfleet_storage::ResourceError;

    use crate::processor::Processor;
    use crate::test_support::storage_context;

    /// Processor returning a canned result after reporting progress.
    struct Scripted {
        reports: Vec<f64>,
        result: fn() -> WorkerResult<Params>,
    }

    #[async_trait]
    impl Processor for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, _params: &Params, ctx: &ProcessorContext) -> WorkerResult<Params> {
            for fraction in &self.reports {
                ctx.progress().report(*fraction);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            (self.result)()
        }
    }

    /// Processor that never finishes on its own.
    struct Stuck;

    #[async_trait]
    impl Processor for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn execute(&self, _params: &Params, _ctx: &ProcessorContext) -> WorkerResult<Params> {
            std::future::pending().await
        }
    }

    struct Harness {
        worker: Worker<MemoryBroker>,
        broker: MemoryBroker,
        bus: Arc<MemoryEventBus>,
        cancel_tx: watch::Sender<bool>,
    }

    async fn harness(processor: Arc<dyn Processor>, config: WorkerConfig) -> Harness {
        let broker = MemoryBroker::new();
        let queue_config = QueueConfig {
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            reconnect_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let queue = Arc::new(QueueClient::new(broker.clone(), queue_config));
        let bus = Arc::new(MemoryEventBus::new());
        let notifier = Notifier::new(reqwest::Client::new(), bus.clone(), "tfleet");
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut registry = ProcessorRegistry::new();
        registry.register(JobType::Image, processor);

        let worker = Worker::new("worker-0", queue, notifier, storage_context().await, cancel_rx)
            .with_registry(registry)
            .with_config(config);
        Harness {
            worker,
            broker,
            bus,
            cancel_tx,
        }
    }

    fn scripted(result: fn() -> WorkerResult<Params>) -> Arc<dyn Processor> {
        Arc::new(Scripted {
            reports: Vec::new(),
            result,
        })
    }

    fn job(retries: u32) -> Job {
        Job::new(JobUid::from_string("u1"), "image", Params::new()).with_retries(retries)
    }

    fn events(bus: &MemoryEventBus) -> Vec<String> {
        bus.published().into_iter().map(|(event, _)| event).collect()
    }

    fn payload(bus: &MemoryEventBus, event: &str) -> Value {
        let (_, payload) = bus
            .published()
            .into_iter()
            .find(|(name, _)| name == event)
            .unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    fn ok_result() -> WorkerResult<Params> {
        let mut result = Params::new();
        result.insert("urls".into(), json!(["file:///tmp/out.mp4"]));
        Ok(result)
    }

    fn temporary_failure() -> WorkerResult<Params> {
        Err(ResourceError::temporarily_unavailable("upstream returned 502").into())
    }

    fn permanent_failure() -> WorkerResult<Params> {
        Err(ResourceError::not_found("http://example.com/missing.jpg").into())
    }

    #[tokio::test]
    async fn test_success_emits_started_then_completed() {
        let h = harness(scripted(ok_result), WorkerConfig::default()).await;
        let outcome = h.worker.dispatch(job(5)).await.unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(
            events(&h.bus),
            vec!["tfleet.started", "tfleet.completed", "tfleet_completed"]
        );
        let completed = payload(&h.bus, "tfleet.completed");
        assert!(completed["time_taken"].as_f64().unwrap() >= 0.0);
        assert_eq!(completed["urls"], json!(["file:///tmp/out.mp4"]));
        assert!(h.broker.ready().is_empty());
    }

    #[tokio::test]
    async fn test_temporary_failure_republishes_with_one_less_retry() {
        let h = harness(scripted(temporary_failure), WorkerConfig::default()).await;
        let outcome = h.worker.dispatch(job(2)).await.unwrap();

        assert_eq!(outcome, Outcome::Retried);
        assert_eq!(events(&h.bus), vec!["tfleet.started", "tfleet.failed_will_retry"]);
        let notice = payload(&h.bus, "tfleet.failed_will_retry");
        assert!(notice["reason"].as_str().unwrap().contains("502"));

        let ready = h.broker.ready();
        assert_eq!(ready.len(), 1);
        let republished = QueueMessage::from_json(&ready[0]).unwrap();
        assert_eq!(republished.job.retries_left(), 1);
        assert_eq!(republished.job.uid().as_str(), "u1");
        assert_eq!(republished.event, "tfleet.job");
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails_once() {
        let h = harness(scripted(temporary_failure), WorkerConfig::default()).await;
        let outcome = h.worker.dispatch(job(0)).await.unwrap();

        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(events(&h.bus), vec!["tfleet.started", "tfleet.failed"]);
        assert!(h.broker.ready().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_ignores_budget() {
        let h = harness(scripted(permanent_failure), WorkerConfig::default()).await;
        let outcome = h.worker.dispatch(job(5)).await.unwrap();

        assert_eq!(outcome, Outcome::Failed);
        let failed = payload(&h.bus, "tfleet.failed");
        assert!(failed["reason"].as_str().unwrap().contains("not found"));
        assert!(h.broker.ready().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_job_fails_after_started() {
        let h = harness(scripted(ok_result), WorkerConfig::default()).await;
        let job = Job::new(JobUid::from_string("u1"), "pdf", Params::new());
        let outcome = h.worker.dispatch(job).await.unwrap();

        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(events(&h.bus), vec!["tfleet.started", "tfleet.failed"]);
    }

    #[tokio::test]
    async fn test_unregistered_processor_is_permanent() {
        let h = harness(scripted(ok_result), WorkerConfig::default()).await;
        let job = Job::new(JobUid::from_string("u1"), "video", Params::new());
        assert_eq!(h.worker.dispatch(job).await.unwrap(), Outcome::Failed);
        assert!(h.broker.ready().is_empty());
    }

    #[tokio::test]
    async fn test_progress_is_throttled() {
        let processor: Arc<dyn Processor> = Arc::new(Scripted {
            reports: vec![0.25, 0.5, 0.75],
            result: ok_result,
        });

        let throttled = harness(processor.clone(), WorkerConfig::default()).await;
        throttled.worker.dispatch(job(5)).await.unwrap();
        assert!(!events(&throttled.bus).contains(&"tfleet.progress".to_string()));

        let eager = harness(
            processor,
            WorkerConfig {
                progress_interval: Duration::ZERO,
                ..Default::default()
            },
        )
        .await;
        eager.worker.dispatch(job(5)).await.unwrap();
        let progress = payload(&eager.bus, "tfleet.progress");
        assert_eq!(progress["progress"], 0.25);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_job() {
        let h = harness(Arc::new(Stuck), WorkerConfig::default()).await;
        let cancel_tx = h.cancel_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = cancel_tx.send(true);
        });

        let outcome = h.worker.dispatch(job(5)).await.unwrap();
        assert_eq!(outcome, Outcome::Canceled);
        assert_eq!(events(&h.bus), vec!["tfleet.started", "tfleet.canceled"]);
        assert!(h.broker.ready().is_empty());
    }

    #[tokio::test]
    async fn test_run_consumes_until_cancelled() {
        let h = harness(scripted(ok_result), WorkerConfig::default()).await;
        let message = QueueMessage::new(job(5), "tfleet");
        h.worker.queue.push(&message).await.unwrap();

        let Harness {
            worker,
            broker,
            bus,
            cancel_tx,
        } = h;
        let worker = Arc::new(worker);
        let running = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while !events(&bus).contains(&"tfleet.completed".to_string()) {
            assert!(Instant::now() < deadline, "job was not processed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel_tx.send(true).unwrap();

        running.await.unwrap().unwrap();
        assert!(broker.ready().is_empty());
        assert_eq!(broker.unacked_count(), 0);
    }
}
