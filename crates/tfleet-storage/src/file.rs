//! Local file driver.
//!
//! The file itself is the local store: reads hand out the file's path and
//! writes go straight to the target, so `save` only closes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::context::StorageContext;
use crate::error::{ResourceError, ResourceResult};
use crate::resource::{OpenMode, Resource};

#[derive(Debug)]
pub struct FileResource {
    uri: String,
    path: PathBuf,
    open: bool,
    content_type: Option<String>,
}

impl FileResource {
    pub fn new(uri: &str, parsed: &Url, _context: &StorageContext) -> ResourceResult<Self> {
        let path = parsed
            .to_file_path()
            .map_err(|_| ResourceError::invalid_uri(uri))?;
        Ok(Self {
            uri: uri.to_string(),
            path,
            open: false,
            content_type: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Resource for FileResource {
    async fn open(&mut self, mode: OpenMode) -> ResourceResult<PathBuf> {
        self.close();
        match mode {
            OpenMode::Read => {
                if !tokio::fs::try_exists(&self.path).await? {
                    return Err(ResourceError::not_found(self.path.display().to_string()));
                }
            }
            OpenMode::Write => {
                if let Some(parent) = self.path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::File::create(&self.path).await?;
            }
        }
        debug!(path = %self.path.display(), ?mode, "Opened file resource");
        self.open = true;
        Ok(self.path.clone())
    }

    fn close(&mut self) {
        self.open = false;
    }

    async fn save(&mut self) -> ResourceResult<()> {
        self.close();
        Ok(())
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn set_content_type(&mut self, content_type: Option<String>) {
        self.content_type = content_type;
    }

    fn local_path(&self) -> Option<&Path> {
        self.open.then_some(self.path.as_path())
    }

    fn url(&self) -> &str {
        &self.uri
    }

    fn public_url(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use crate::resource::parse_uri;

    fn file_uri(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    #[tokio::test]
    async fn test_write_save_then_read_returns_same_bytes() {
        let ctx = test_context().await;
        let dir = tempfile::tempdir().unwrap();
        let uri = file_uri(&dir.path().join("nested/out.bin"));

        let mut handle = parse_uri(&uri, &ctx).unwrap();
        let path = handle.open(OpenMode::Write).await.unwrap();
        tokio::fs::write(&path, b"hello \x00 world").await.unwrap();
        handle.save().await.unwrap();
        assert!(handle.local_path().is_none());

        let mut handle = parse_uri(&uri, &ctx).unwrap();
        let path = handle.open(OpenMode::Read).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello \x00 world");
        handle.close();
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let ctx = test_context().await;
        let dir = tempfile::tempdir().unwrap();
        let uri = file_uri(&dir.path().join("missing"));

        let mut handle = parse_uri(&uri, &ctx).unwrap();
        let err = handle.open(OpenMode::Read).await.unwrap_err();
        assert!(matches!(err, ResourceError::NotFound(_)));
        assert!(err.is_permanent());
        assert!(handle.public_url().is_none());
    }
}
