//! Broker abstraction.

use async_trait::async_trait;

use crate::error::QueueResult;

/// A message handed out by [`Broker::pop`], pending ack or reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-specific delivery tag
    pub tag: String,
    /// Raw message body
    pub payload: String,
}

/// Minimal durable queue operations.
///
/// Implementations connect lazily and keep their connection until
/// [`Broker::reset`]. Errors for which
/// [`QueueError::is_connection_error`](crate::QueueError::is_connection_error)
/// holds make the caller reset and reconnect.
#[async_trait]
pub trait Broker: Send + 'static {
    /// Establish the connection and declare the queue. No-op when connected.
    async fn connect(&mut self) -> QueueResult<()>;

    /// Publish a persistent message.
    async fn publish(&mut self, payload: String) -> QueueResult<()>;

    /// Fetch the next message, waiting briefly. `None` when the queue is empty.
    async fn pop(&mut self) -> QueueResult<Option<Delivery>>;

    async fn ack(&mut self, tag: String) -> QueueResult<()>;

    /// Reject a delivery, either back onto the queue or to the dead letters.
    async fn reject(&mut self, tag: String, requeue: bool) -> QueueResult<()>;

    /// Messages waiting in the queue, when the broker can tell.
    async fn message_count(&mut self) -> QueueResult<Option<u64>>;

    /// Drop the connection and every handle derived from it.
    fn reset(&mut self);
}
