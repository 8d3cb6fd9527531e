//! Resource handles for job inputs and outputs.
//!
//! This crate provides:
//! - URI parsing into a polymorphic [`ResourceHandle`]
//! - File, HTTP(S) and S3 drivers behind the [`Resource`] trait
//! - A permanent/temporary error taxonomy for transport failures
//! - Shared driver context (HTTP client, S3 client, temp directory)

pub mod config;
pub mod context;
pub mod error;
pub mod file;
pub mod http;
pub mod resource;
pub mod s3;

pub use config::StorageConfig;
pub use context::StorageContext;
pub use error::{ResourceError, ResourceResult};
pub use file::FileResource;
pub use http::HttpResource;
pub use resource::{parse_uri, OpenMode, Resource, ResourceHandle, TempStore};
pub use s3::{S3Location, S3Resource};
