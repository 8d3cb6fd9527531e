//! Pub/sub bus for job notifications.

use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{QueueError, QueueResult};

/// Fire-and-forget event publishing.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish `payload` under the event name `event`.
    async fn publish(&self, event: &str, payload: String) -> QueueResult<()>;
}

/// Publishes events with Redis `PUBLISH`, using the event name as channel.
pub struct RedisEventBus {
    client: redis::Client,
    conn: tokio::sync::Mutex<Option<MultiplexedConnection>>,
}

impl RedisEventBus {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: tokio::sync::Mutex::new(None),
        })
    }

    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: &str, payload: String) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        debug!(channel = event, "Publishing event");
        let result = conn.publish::<_, _, ()>(event, payload).await;
        if let Err(e) = result {
            let e = QueueError::from(e);
            if e.is_connection_error() {
                *self.conn.lock().await = None;
            }
            return Err(e);
        }
        Ok(())
    }
}

/// In-memory pub/sub bus for tests/dev.
///
/// Keeps every published event and fans them out to subscribers.
pub struct MemoryEventBus {
    published: Mutex<Vec<(String, String)>>,
    sender: broadcast::Sender<(String, String)>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far, as `(event, payload)`.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, String)> {
        self.sender.subscribe()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            published: Mutex::new(Vec::new()),
            sender,
        }
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: &str, payload: String) -> QueueResult<()> {
        let entry = (event.to_string(), payload);
        if let Ok(mut events) = self.published.lock() {
            events.push(entry.clone());
        }
        // No subscribers is fine
        let _ = self.sender.send(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_bus_records_and_fans_out() {
        let bus = MemoryEventBus::new();
        let mut rx = bus.subscribe();

        bus.publish("tfleet.started", "{}".to_string()).await.unwrap();

        assert_eq!(
            bus.published(),
            vec![("tfleet.started".to_string(), "{}".to_string())]
        );
        assert_eq!(rx.recv().await.unwrap().0, "tfleet.started");
    }
}
