//! Shared data models for the transcode fleet.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their identifiers and the job type allow-list
//! - The queue message wire format
//! - Lifecycle notification payloads
//! - The failure classification shared by every component

pub mod error;
pub mod failure;
pub mod job;
pub mod message;
pub mod notification;

pub use error::{JobError, JobResult};
pub use failure::FailureClass;
pub use job::{Job, JobType, JobUid, Params, DEFAULT_MAX_RETRIES, DEFAULT_NAMESPACE};
pub use message::QueueMessage;
pub use notification::{JobEvent, Notification};
