//! Durable job queue client.
//!
//! This crate provides:
//! - A [`Broker`] abstraction with a Redis Streams implementation and an
//!   in-memory one for tests
//! - [`QueueClient`]: reconnecting publish, best-effort depth, and an
//!   ack/reject consume loop gated by [`Backoff`]
//! - An [`EventBus`] for pub/sub notifications

pub mod backoff;
pub mod broker;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod redis_broker;

pub use backoff::Backoff;
pub use broker::{Broker, Delivery};
pub use bus::{EventBus, MemoryEventBus, RedisEventBus};
pub use client::{JobPublisher, QueueClient};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;
