//! Queue client.
//!
//! Wraps a [`Broker`] with two retry envelopes:
//! - connection errors tear the connection down, wait, reconnect and retry
//!   the operation indefinitely, so callers never see them
//! - other broker errors on `push` are retried a bounded number of times

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use tfleet_models::QueueMessage;

use crate::backoff::Backoff;
use crate::broker::{Broker, Delivery};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Anything that accepts jobs for execution.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, message: &QueueMessage) -> QueueResult<()>;

    /// Best-effort queue depth.
    async fn count(&self) -> Option<u64>;
}

/// Durable queue client.
///
/// The broker is guarded by a mutex held for one operation at a time, so a
/// job handler running inside [`QueueClient::consume`] can publish through
/// the same client.
pub struct QueueClient<B> {
    broker: Mutex<B>,
    config: QueueConfig,
}

impl<B: Broker> QueueClient<B> {
    pub fn new(broker: B, config: QueueConfig) -> Self {
        Self {
            broker: Mutex::new(broker),
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Run `op` on a connected broker, reconnecting after connection errors.
    async fn with_connection<T, F>(&self, mut op: F) -> QueueResult<T>
    where
        F: for<'a> FnMut(&'a mut B) -> BoxFuture<'a, QueueResult<T>>,
    {
        let mut broker = self.broker.lock().await;
        loop {
            let result = match broker.connect().await {
                Ok(()) => op(&mut *broker).await,
                Err(e) => Err(e),
            };
            match result {
                Err(e) if e.is_connection_error() => {
                    error!(error = %e, "Error in broker connection, retrying");
                    broker.reset();
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
                other => return other,
            }
        }
    }

    /// [`Self::with_connection`] plus bounded retries of broker-side failures.
    async fn with_retry<T, F>(&self, mut op: F) -> QueueResult<T>
    where
        F: for<'a> FnMut(&'a mut B) -> BoxFuture<'a, QueueResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match self.with_connection(&mut op).await {
                Err(e) if attempt + 1 < self.config.logical_retry_limit => {
                    attempt += 1;
                    error!(error = %e, attempt, "Queue access failed, will retry");
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
                other => return other,
            }
        }
    }

    /// Publish a job message.
    pub async fn push(&self, message: &QueueMessage) -> QueueResult<()> {
        let payload = message.to_json()?;
        self.with_retry(|b| b.publish(payload.clone())).await?;
        metrics::counter!("tfleet_queue_publishes_total").increment(1);
        info!(uid = %message.job.uid(), "Published job");
        Ok(())
    }

    /// Messages waiting in the queue. `None` when the broker cannot say right now.
    pub async fn count(&self) -> Option<u64> {
        let mut broker = self.broker.lock().await;
        let result = match broker.connect().await {
            Ok(()) => broker.message_count().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Could not read queue depth");
                if e.is_connection_error() {
                    broker.reset();
                }
                None
            }
        }
    }

    /// Consume messages until `shutdown` reads `true`.
    ///
    /// Each message is parsed and passed to `handler`. Success acknowledges
    /// the message. A handler error rejects it back onto the queue and is
    /// returned to the caller. Unparsable messages are logged and rejected
    /// without requeue.
    pub async fn consume<H, Fut, E>(&self, mut handler: H, shutdown: watch::Receiver<bool>) -> Result<(), E>
    where
        H: FnMut(QueueMessage) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<QueueError> + fmt::Display,
    {
        let mut backoff = Backoff::new(self.config.base_backoff, self.config.max_backoff)
            .interruptible(shutdown.clone());

        while !*shutdown.borrow() {
            backoff.wrap(self.consume_one(&mut handler)).await?;
        }
        info!("Consumer stopped");
        Ok(())
    }

    /// One consume cycle. `Ok(true)` when a message was handled.
    async fn consume_one<H, Fut, E>(&self, handler: &mut H) -> Result<bool, E>
    where
        H: FnMut(QueueMessage) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<QueueError> + fmt::Display,
    {
        let delivery = match self.with_connection(|b| b.pop()).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(error = %e, "Failed to fetch message");
                return Ok(false);
            }
        };
        let Delivery { tag, payload } = delivery;

        let message = match QueueMessage::from_json(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, payload = %payload, "Discarding malformed message");
                self.with_connection(|b| b.reject(tag.clone(), false)).await?;
                return Ok(true);
            }
        };

        info!(payload = %payload, "Consuming");
        match handler(message).await {
            Ok(()) => {
                self.with_connection(|b| b.ack(tag.clone())).await?;
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "Handler failed, requeueing message");
                self.with_connection(|b| b.reject(tag.clone(), true)).await?;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<B: Broker> JobPublisher for QueueClient<B> {
    async fn publish(&self, message: &QueueMessage) -> QueueResult<()> {
        self.push(message).await
    }

    async fn count(&self) -> Option<u64> {
        QueueClient::count(self).await
    }
}
