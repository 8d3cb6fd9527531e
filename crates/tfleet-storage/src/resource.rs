//! The resource handle abstraction.
//!
//! A handle is parsed from a URI and moves through
//! `Closed -> OpenForRead -> Closed` or `Closed -> OpenForWrite -> Saved`.
//! While open it owns at most one local temporary store, which is released
//! on `close`, on re-open, and when the handle is dropped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use url::Url;

use crate::context::StorageContext;
use crate::error::{ResourceError, ResourceResult};
use crate::file::FileResource;
use crate::http::HttpResource;
use crate::s3::S3Resource;

/// How a handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl FromStr for OpenMode {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            other => Err(ResourceError::InvalidMode(other.to_string())),
        }
    }
}

/// Uniform open/save interface over a URI-addressed byte store.
#[async_trait]
pub trait Resource: Send + Sync + fmt::Debug {
    /// Open the resource and return the local path holding its bytes.
    ///
    /// Reading fetches the content into the local store. Writing yields an
    /// empty local store to be filled and then [`Resource::save`]d. Any store
    /// left from a previous open is released first.
    async fn open(&mut self, mode: OpenMode) -> ResourceResult<PathBuf>;

    /// Release the local store. Safe to call in any state.
    fn close(&mut self);

    /// Replace the resource with the local store's content, then close.
    /// Does nothing when nothing is open.
    async fn save(&mut self) -> ResourceResult<()>;

    fn content_type(&self) -> Option<&str>;

    fn set_content_type(&mut self, content_type: Option<String>);

    /// Path of the local store, while open.
    fn local_path(&self) -> Option<&Path>;

    /// The URI the handle was parsed from.
    fn url(&self) -> &str;

    /// Publicly reachable HTTP URL, when the resource has one.
    fn public_url(&self) -> Option<String>;
}

/// An owned, type-erased resource.
pub type ResourceHandle = Box<dyn Resource>;

/// Parse `uri` into a handle.
///
/// Supported schemes are `file`, `http`, `https` and `s3`.
pub fn parse_uri(uri: &str, context: &StorageContext) -> ResourceResult<ResourceHandle> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(ResourceError::invalid_uri("Resource URI cannot be empty"));
    }
    let parsed =
        Url::parse(uri).map_err(|e| ResourceError::invalid_uri(format!("{} ({})", uri, e)))?;

    match parsed.scheme() {
        "file" => Ok(Box::new(FileResource::new(uri, &parsed, context)?)),
        "http" | "https" => Ok(Box::new(HttpResource::new(uri, parsed, context.clone()))),
        "s3" => Ok(Box::new(S3Resource::new(uri, &parsed, context.clone())?)),
        _ => Err(ResourceError::UnsupportedScheme(uri.to_string())),
    }
}

/// A private temporary file deleted when dropped.
#[derive(Debug)]
pub struct TempStore {
    file: NamedTempFile,
}

impl TempStore {
    /// Create an empty store in `dir`, or the system temp dir.
    pub fn create(dir: Option<&Path>) -> ResourceResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tfleet");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub async fn len(&self) -> ResourceResult<u64> {
        Ok(tokio::fs::metadata(self.path()).await?.len())
    }

    pub async fn is_empty(&self) -> ResourceResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Open the store for async writing, truncating it.
    pub async fn writer(&self) -> ResourceResult<tokio::fs::File> {
        Ok(tokio::fs::File::create(self.path()).await?)
    }

    pub async fn read(&self) -> ResourceResult<Vec<u8>> {
        Ok(tokio::fs::read(self.path()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;

    #[test]
    fn test_open_mode() {
        assert_eq!("r".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("w".parse::<OpenMode>().unwrap(), OpenMode::Write);
        let err = "rw".parse::<OpenMode>().unwrap_err();
        assert!(matches!(err, ResourceError::InvalidMode(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_parse_schemes() {
        let ctx = test_context().await;

        assert_eq!(parse_uri("file:///tmp/x", &ctx).unwrap().url(), "file:///tmp/x");
        assert_eq!(
            parse_uri("http://example.com/a", &ctx).unwrap().url(),
            "http://example.com/a"
        );
        assert_eq!(
            parse_uri("https://example.com/a", &ctx).unwrap().url(),
            "https://example.com/a"
        );
        assert_eq!(parse_uri("s3:bucket/key", &ctx).unwrap().url(), "s3:bucket/key");
    }

    #[tokio::test]
    async fn test_parse_rejects_unsupported_and_invalid() {
        let ctx = test_context().await;

        for uri in ["ftp://example.com/a", "gopher://example.com/"] {
            let err = parse_uri(uri, &ctx).unwrap_err();
            assert!(matches!(err, ResourceError::UnsupportedScheme(_)), "{}", uri);
        }
        for uri in ["xyz", "", "   "] {
            let err = parse_uri(uri, &ctx).unwrap_err();
            assert!(matches!(err, ResourceError::InvalidUri(_)), "{:?}", uri);
            assert!(err.is_permanent());
        }
    }

    #[tokio::test]
    async fn test_temp_store_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::create(Some(dir.path())).unwrap();
        let path = store.path().to_path_buf();
        assert!(path.exists());
        assert!(store.is_empty().await.unwrap());

        drop(store);
        assert!(!path.exists());
    }
}
