//! S3 object driver.
//!
//! URIs have the form `s3:<bucket>/<key>[?acl=..&storage_class=..&content_type=..]`.
//! `s3://<bucket>/<key>` is accepted as well.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ObjectCannedAcl, StorageClass};
use tracing::{debug, info};
use url::Url;

use crate::context::StorageContext;
use crate::error::{ResourceError, ResourceResult};
use crate::resource::{OpenMode, Resource, TempStore};

const NOT_FOUND_CODES: &[&str] = &["NoSuchKey", "NoSuchBucket", "NotFound"];

/// Bucket, key and upload options parsed from an S3 URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
    pub acl: Option<String>,
    pub storage_class: Option<String>,
    pub content_type: Option<String>,
}

impl S3Location {
    pub fn parse(uri: &str, parsed: &Url) -> ResourceResult<Self> {
        let (bucket, key) = match parsed.host_str() {
            Some(host) => (host.to_string(), parsed.path().trim_start_matches('/').to_string()),
            None => {
                let path = parsed.path().trim_start_matches('/');
                let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
                (bucket.to_string(), key.to_string())
            }
        };
        if bucket.is_empty() || key.is_empty() {
            return Err(ResourceError::invalid_uri(format!(
                "{} (expected s3:<bucket>/<key>)",
                uri
            )));
        }
        let key = urlencoding::decode(&key)
            .map_err(|_| ResourceError::invalid_uri(uri))?
            .into_owned();

        let mut location = Self {
            bucket,
            key,
            acl: None,
            storage_class: None,
            content_type: None,
        };
        for (name, value) in parsed.query_pairs() {
            match name.as_ref() {
                "acl" => location.acl = Some(value.into_owned()),
                "storage_class" => location.storage_class = Some(value.into_owned()),
                "content_type" => location.content_type = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(location)
    }

    /// Public HTTP URL of the object.
    pub fn public_url(&self, base: Option<&str>) -> String {
        let key = self
            .key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        match base {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
        }
    }
}

#[derive(Debug)]
pub struct S3Resource {
    uri: String,
    location: S3Location,
    context: StorageContext,
    store: Option<TempStore>,
    content_type: Option<String>,
}

impl S3Resource {
    pub fn new(uri: &str, parsed: &Url, context: StorageContext) -> ResourceResult<Self> {
        Ok(Self {
            uri: uri.to_string(),
            location: S3Location::parse(uri, parsed)?,
            context,
            store: None,
            content_type: None,
        })
    }

    pub fn location(&self) -> &S3Location {
        &self.location
    }

    async fn download(&mut self) -> ResourceResult<PathBuf> {
        debug!(bucket = %self.location.bucket, key = %self.location.key, "Downloading");

        let response = self
            .context
            .s3()
            .get_object()
            .bucket(&self.location.bucket)
            .key(&self.location.key)
            .send()
            .await
            .map_err(|e| match e.code() {
                Some(code) if NOT_FOUND_CODES.contains(&code) => {
                    ResourceError::not_found(self.uri.clone())
                }
                _ if is_timeout(&e) => {
                    ResourceError::timeout(format!("Download of {} timed out", self.uri))
                }
                _ => ResourceError::temporarily_unavailable(format!(
                    "Download of {} failed: {}",
                    self.uri,
                    DisplayErrorContext(&e)
                )),
            })?;

        let content_type = response.content_type().map(str::to_string);
        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| {
                ResourceError::temporarily_unavailable(format!(
                    "Download of {} interrupted: {}",
                    self.uri, e
                ))
            })?
            .into_bytes();

        let store = TempStore::create(self.context.temp_dir())?;
        tokio::fs::write(store.path(), &bytes).await?;
        let path = store.path().to_path_buf();
        self.store = Some(store);
        self.content_type = content_type;
        Ok(path)
    }
}

#[async_trait]
impl Resource for S3Resource {
    async fn open(&mut self, mode: OpenMode) -> ResourceResult<PathBuf> {
        self.close();
        match mode {
            OpenMode::Read => self.download().await,
            OpenMode::Write => {
                let store = TempStore::create(self.context.temp_dir())?;
                let path = store.path().to_path_buf();
                self.store = Some(store);
                Ok(path)
            }
        }
    }

    fn close(&mut self) {
        self.store = None;
    }

    async fn save(&mut self) -> ResourceResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let size = store.len().await?;
        info!(uri = %self.uri, bytes = size, "Uploading");

        let acl = self.location.acl.as_deref().unwrap_or("private");
        let storage_class = self
            .location
            .storage_class
            .as_deref()
            .unwrap_or("standard")
            .to_uppercase();
        let content_type = self
            .location
            .content_type
            .clone()
            .or_else(|| self.content_type.clone());

        let body = ByteStream::from_path(store.path()).await.map_err(|e| {
            ResourceError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;

        let started = Instant::now();
        self.context
            .s3()
            .put_object()
            .bucket(&self.location.bucket)
            .key(&self.location.key)
            .acl(ObjectCannedAcl::from(acl))
            .storage_class(StorageClass::from(storage_class.as_str()))
            .set_content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| match e.code() {
                Some("NoSuchBucket") => ResourceError::not_found(format!(
                    "Bucket {:?} not found",
                    self.location.bucket
                )),
                _ if is_timeout(&e) => {
                    ResourceError::timeout(format!("Upload to {} timed out", self.uri))
                }
                _ => ResourceError::temporarily_unavailable(format!(
                    "Upload to {} failed: {}",
                    self.uri,
                    DisplayErrorContext(&e)
                )),
            })?;

        info!(
            uri = %self.uri,
            "Upload took {:.3} seconds",
            started.elapsed().as_secs_f64()
        );
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
        self.store.as_ref().map(TempStore::path)
    }

    fn url(&self) -> &str {
        &self.uri
    }

    fn public_url(&self) -> Option<String> {
        Some(self.location.public_url(self.context.public_base_url()))
    }
}

fn is_timeout<E, R>(e: &SdkError<E, R>) -> bool {
    matches!(e, SdkError::TimeoutError(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use crate::resource::parse_uri;

    fn location(uri: &str) -> S3Location {
        S3Location::parse(uri, &Url::parse(uri).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_opaque_form_with_options() {
        let loc = location("s3:media/videos/out.mp4?acl=public-read&storage_class=reduced_redundancy&content_type=video/mp4");
        assert_eq!(loc.bucket, "media");
        assert_eq!(loc.key, "videos/out.mp4");
        assert_eq!(loc.acl.as_deref(), Some("public-read"));
        assert_eq!(loc.storage_class.as_deref(), Some("reduced_redundancy"));
        assert_eq!(loc.content_type.as_deref(), Some("video/mp4"));
    }

    #[test]
    fn test_parse_authority_form() {
        let loc = location("s3://media/a/b.jpg");
        assert_eq!(loc.bucket, "media");
        assert_eq!(loc.key, "a/b.jpg");
        assert!(loc.acl.is_none());
    }

    #[test]
    fn test_sdk_timeouts_are_recognized() {
        assert!(is_timeout(&SdkError::<(), ()>::timeout_error("slow")));
        assert!(!is_timeout(&SdkError::<(), ()>::construction_failure("bad")));
    }

    #[test]
    fn test_missing_key_is_invalid() {
        let uri = "s3:bucketonly";
        let err = S3Location::parse(uri, &Url::parse(uri).unwrap()).unwrap_err();
        assert!(matches!(err, ResourceError::InvalidUri(_)));
    }

    #[test]
    fn test_public_url() {
        let loc = location("s3:media/path/my%20file.jpg");
        assert_eq!(loc.key, "path/my file.jpg");
        assert_eq!(
            loc.public_url(None),
            "https://media.s3.amazonaws.com/path/my%20file.jpg"
        );
        assert_eq!(
            loc.public_url(Some("https://cdn.example.com/")),
            "https://cdn.example.com/path/my%20file.jpg"
        );
    }

    #[tokio::test]
    async fn test_public_url_without_open() {
        let ctx = test_context().await;
        let mut handle = parse_uri("s3:media/thumb.png", &ctx).unwrap();
        assert_eq!(
            handle.public_url().as_deref(),
            Some("https://media.s3.amazonaws.com/thumb.png")
        );
        assert!(handle.local_path().is_none());

        // Saving a handle that was never opened does nothing.
        handle.save().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_write_then_close_releases_store() {
        let ctx = test_context().await;
        let mut handle = parse_uri("s3:media/out.bin", &ctx).unwrap();
        let first = handle.open(OpenMode::Write).await.unwrap();
        let second = handle.open(OpenMode::Write).await.unwrap();
        assert!(!first.exists());
        assert!(second.exists());
        handle.close();
        assert!(!second.exists());
    }
}
