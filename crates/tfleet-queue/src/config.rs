//! Queue configuration.

use std::time::Duration;

use tfleet_models::DEFAULT_NAMESPACE;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// How long a single fetch blocks waiting for a message
    pub block_timeout: Duration,
    /// First delay after an empty or failed poll
    pub base_backoff: Duration,
    /// Upper bound for the poll delay
    pub max_backoff: Duration,
    /// Pause before reconnecting after a connection error
    pub reconnect_delay: Duration,
    /// Pending entries idle this long are taken over from their consumer
    pub claim_idle: Duration,
    /// Attempts for an operation failing on a healthy connection
    pub logical_retry_limit: u32,
    /// Namespace for message and notification events
    pub namespace: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "tfleet:jobs".to_string(),
            consumer_group: "tfleet:workers".to_string(),
            dlq_stream_name: "tfleet:dlq".to_string(),
            block_timeout: Duration::from_millis(1000),
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            reconnect_delay: Duration::from_millis(500),
            claim_idle: Duration::from_secs(30 * 60),
            logical_retry_limit: 10,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            block_timeout: std::env::var("QUEUE_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.block_timeout),
            base_backoff: defaults.base_backoff,
            max_backoff: std::env::var("QUEUE_MAX_BACKOFF_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_backoff),
            reconnect_delay: defaults.reconnect_delay,
            claim_idle: std::env::var("QUEUE_CLAIM_IDLE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.claim_idle),
            logical_retry_limit: std::env::var("QUEUE_RETRY_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.logical_retry_limit),
            namespace: std::env::var("QUEUE_NAMESPACE").unwrap_or(defaults.namespace),
        }
    }
}
