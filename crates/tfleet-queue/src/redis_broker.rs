//! Redis Streams broker.
//!
//! Jobs are stream entries with a single `job` field. Each worker reads
//! through a consumer group, so a delivery is owned by one consumer until it
//! is acknowledged (`XACK` + `XDEL`) or rejected. Entries left pending by a
//! consumer that died are claimed by the next consumer to poll once they
//! have been idle for `claim_idle`.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamPendingReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::broker::{Broker, Delivery};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

const PAYLOAD_FIELD: &str = "job";

pub struct RedisBroker {
    client: redis::Client,
    config: QueueConfig,
    consumer_name: String,
    conn: Option<MultiplexedConnection>,
    /// Payloads of deliveries not yet acked or rejected, by entry id
    in_flight: HashMap<String, String>,
}

impl RedisBroker {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let consumer_name = format!("worker-{}", uuid::Uuid::new_v4().simple());
        Ok(Self {
            client,
            config,
            consumer_name,
            conn: None,
            in_flight: HashMap::new(),
        })
    }

    /// Use a fixed consumer name instead of a random one.
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    fn conn(&mut self) -> QueueResult<&mut MultiplexedConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| QueueError::connection_failed("Not connected"))
    }

    async fn xadd(&mut self, stream: String, fields: Vec<(&'static str, String)>) -> QueueResult<String> {
        let conn = self.conn()?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in fields {
            cmd.arg(name).arg(value);
        }
        Ok(cmd.query_async(conn).await?)
    }

    async fn remove(&mut self, tag: &str) -> QueueResult<()> {
        let stream = self.config.stream_name.clone();
        let group = self.config.consumer_group.clone();
        let conn = self.conn()?;

        redis::cmd("XACK")
            .arg(&stream)
            .arg(&group)
            .arg(tag)
            .query_async::<()>(conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&stream)
            .arg(tag)
            .query_async::<()>(conn)
            .await?;

        self.in_flight.remove(tag);
        Ok(())
    }

    /// Take over one entry another consumer left pending for too long.
    async fn claim_idle(&mut self) -> QueueResult<Option<StreamId>> {
        let group = self.config.consumer_group.clone();
        let consumer = self.consumer_name.clone();
        let stream = self.config.stream_name.clone();
        let min_idle_ms = self.config.claim_idle.as_millis() as u64;
        let conn = self.conn()?;

        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&stream)
            .arg(&group)
            .arg(&consumer)
            .arg(min_idle_ms)
            .arg("0")
            .arg("COUNT")
            .arg(1)
            .query_async(conn)
            .await?;

        if !reply.deleted_ids.is_empty() {
            debug!(count = reply.deleted_ids.len(), "Dropped pending ids of deleted entries");
        }
        let entry = reply.claimed.into_iter().next();
        if let Some(entry) = &entry {
            info!(message_id = %entry.id, consumer = %consumer, "Claimed idle pending message");
        }
        Ok(entry)
    }

    fn deliver(&mut self, entry: StreamId) -> Delivery {
        // Entries without a readable payload surface as empty bodies and are
        // dead-lettered by the consumer.
        let payload = entry
            .get::<String>(PAYLOAD_FIELD)
            .unwrap_or_default();
        self.in_flight.insert(entry.id.clone(), payload.clone());
        Delivery {
            tag: entry.id,
            payload,
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn connect(&mut self) -> QueueResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        info!(url = %self.config.redis_url, "Connecting to Redis");
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        self.conn = Some(conn);
        Ok(())
    }

    async fn publish(&mut self, payload: String) -> QueueResult<()> {
        let stream = self.config.stream_name.clone();
        let id = self.xadd(stream, vec![(PAYLOAD_FIELD, payload)]).await?;
        debug!(message_id = %id, "Published message");
        Ok(())
    }

    async fn pop(&mut self) -> QueueResult<Option<Delivery>> {
        if let Some(entry) = self.claim_idle().await? {
            return Ok(Some(self.deliver(entry)));
        }

        let group = self.config.consumer_group.clone();
        let consumer = self.consumer_name.clone();
        let stream = self.config.stream_name.clone();
        let block_ms = self.config.block_timeout.as_millis() as u64;
        let conn = self.conn()?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&group)
            .arg(&consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&stream)
            .arg(">") // Only new messages
            .query_async(conn)
            .await?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };
        Ok(Some(self.deliver(entry)))
    }

    async fn ack(&mut self, tag: String) -> QueueResult<()> {
        self.remove(&tag).await?;
        debug!(message_id = %tag, "Acknowledged message");
        Ok(())
    }

    async fn reject(&mut self, tag: String, requeue: bool) -> QueueResult<()> {
        let payload = self.in_flight.get(&tag).cloned().unwrap_or_default();
        if requeue {
            let stream = self.config.stream_name.clone();
            self.xadd(stream, vec![(PAYLOAD_FIELD, payload)]).await?;
            debug!(message_id = %tag, "Requeued message");
        } else {
            let dlq = self.config.dlq_stream_name.clone();
            self.xadd(
                dlq,
                vec![(PAYLOAD_FIELD, payload), ("original_id", tag.clone())],
            )
            .await?;
            warn!(message_id = %tag, "Moved message to DLQ");
        }
        self.remove(&tag).await
    }

    /// Entries waiting for delivery. Entries delivered but not yet acked
    /// still occupy the stream and are subtracted.
    async fn message_count(&mut self) -> QueueResult<Option<u64>> {
        let stream = self.config.stream_name.clone();
        let group = self.config.consumer_group.clone();
        let conn = self.conn()?;
        let len: u64 = conn.xlen(&stream).await?;
        let pending: StreamPendingReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(&group)
            .query_async(conn)
            .await?;
        Ok(Some(len.saturating_sub(pending.count() as u64)))
    }

    fn reset(&mut self) {
        if self.conn.take().is_some() {
            info!("Dropped Redis connection");
        }
        // In-flight entries stay pending in the group and can still be
        // acknowledged by id once reconnected.
    }
}
