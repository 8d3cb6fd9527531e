//! HTTP(S) driver.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION, RETRY_AFTER};
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use url::Url;

use crate::context::StorageContext;
use crate::error::{ResourceError, ResourceResult};
use crate::resource::{OpenMode, Resource, TempStore};

#[derive(Debug)]
pub struct HttpResource {
    uri: String,
    url: Url,
    context: StorageContext,
    store: Option<TempStore>,
    content_type: Option<String>,
}

impl HttpResource {
    pub fn new(uri: &str, url: Url, context: StorageContext) -> Self {
        Self {
            uri: uri.to_string(),
            url,
            context,
            store: None,
            content_type: None,
        }
    }

    async fn fetch(&mut self) -> ResourceResult<PathBuf> {
        let mut visited = HashSet::new();
        let mut url = self.url.clone();
        info!(url = %url, "Fetching");

        loop {
            self.close();

            let mut response = self
                .context
                .http()
                .get(url.clone())
                .header(ACCEPT, "*/*")
                .send()
                .await
                .map_err(|e| transport_error(&url, e))?;

            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            info!(
                status = status.as_u16(),
                content_type = content_type.as_deref().unwrap_or("-"),
                "Responded"
            );

            match status {
                StatusCode::OK => {
                    let store = TempStore::create(self.context.temp_dir())?;
                    let mut writer = store.writer().await?;
                    while let Some(chunk) = response
                        .chunk()
                        .await
                        .map_err(|e| transport_error(&url, e))?
                    {
                        writer.write_all(&chunk).await?;
                    }
                    writer.flush().await?;

                    if store.is_empty().await? {
                        error!(url = %url, "Response is unexpectedly empty");
                        return Err(ResourceError::Empty(url.to_string()));
                    }
                    let path = store.path().to_path_buf();
                    self.store = Some(store);
                    self.content_type = content_type;
                    return Ok(path);
                }
                StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT => {
                    let Some(location) = response
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                    else {
                        info!("Missing location header in response");
                        return Err(ResourceError::not_found(url.to_string()));
                    };
                    let next = url.join(location).map_err(|_| {
                        ResourceError::invalid_uri(format!("Bad redirect location {}", location))
                    })?;
                    if !visited.insert(next.to_string()) {
                        return Err(ResourceError::TooManyRedirects(next.to_string()));
                    }
                    info!(location = %next, "Redirected");
                    url = next;
                }
                StatusCode::NOT_FOUND | StatusCode::GONE => {
                    return Err(ResourceError::not_found(url.to_string()));
                }
                StatusCode::SERVICE_UNAVAILABLE => {
                    let message = format!("Server returned status {} for {}", status.as_u16(), url);
                    // Only a server that says when to come back is worth retrying.
                    return if response.headers().contains_key(RETRY_AFTER) {
                        info!("Retry-After header, counting as retriable");
                        Err(ResourceError::temporarily_unavailable(message))
                    } else {
                        info!("No Retry-After header, counting as permanent failure");
                        Err(ResourceError::Unavailable(message))
                    };
                }
                StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                    return Err(ResourceError::temporarily_unavailable(format!(
                        "Server returned status {} for {}",
                        status.as_u16(),
                        url
                    )));
                }
                _ => {
                    return Err(ResourceError::unexpected_response(format!(
                        "Server returned status {} for {}",
                        status.as_u16(),
                        url
                    )));
                }
            }
        }
    }
}

fn transport_error(url: &Url, e: reqwest::Error) -> ResourceError {
    if e.is_timeout() {
        ResourceError::timeout(format!("Timeout fetching {}", url))
    } else {
        ResourceError::temporarily_unavailable(format!("Socket error fetching {}: {}", url, e))
    }
}

#[async_trait]
impl Resource for HttpResource {
    async fn open(&mut self, mode: OpenMode) -> ResourceResult<PathBuf> {
        match mode {
            OpenMode::Read => self.fetch().await,
            OpenMode::Write => {
                self.close();
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
        let body = store.read().await?;
        let content_type = self
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        info!(url = %self.url, bytes = body.len(), "Posting");

        let response = self
            .context
            .http()
            .post(self.url.clone())
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(&self.url, e))?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(ResourceError::unexpected_response(format!(
                "Server returned status {} when trying to POST to {}",
                status.as_u16(),
                self.url
            )));
        }
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
        Some(self.uri.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::context::test_context;
    use std::time::Duration;
    use crate::resource::parse_uri;
    use tfleet_models::FailureClass;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn open_read(server: &MockServer, route: &str) -> ResourceResult<Vec<u8>> {
        let ctx = test_context().await;
        let mut handle = parse_uri(&format!("{}{}", server.uri(), route), &ctx)?;
        let path = handle.open(OpenMode::Read).await?;
        let bytes = tokio::fs::read(&path).await?;
        handle.close();
        assert!(!path.exists());
        Ok(bytes)
    }

    #[tokio::test]
    async fn test_fetches_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/jpeg")
                    .set_body_bytes(b"jpegdata".to_vec()),
            )
            .mount(&server)
            .await;

        let ctx = test_context().await;
        let mut handle = parse_uri(&format!("{}/a.jpg", server.uri()), &ctx).unwrap();
        let path = handle.open(OpenMode::Read).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"jpegdata");
        assert_eq!(handle.content_type(), Some("image/jpeg"));
        assert_eq!(handle.public_url().as_deref(), Some(handle.url()));
    }

    #[tokio::test]
    async fn test_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"moved".to_vec()))
            .mount(&server)
            .await;

        assert_eq!(open_read(&server, "/old").await.unwrap(), b"moved");
    }

    #[tokio::test]
    async fn test_redirect_loop_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/b"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/a"))
            .mount(&server)
            .await;

        let err = open_read(&server, "/a").await.unwrap_err();
        assert!(matches!(err, ResourceError::TooManyRedirects(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_redirect_without_location_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302))
            .mount(&server)
            .await;

        let err = open_read(&server, "/x").await.unwrap_err();
        assert!(matches!(err, ResourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let cases = [
            (404, FailureClass::Permanent),
            (410, FailureClass::Permanent),
            (502, FailureClass::Temporary),
            (504, FailureClass::Temporary),
            (500, FailureClass::Temporary),
            (403, FailureClass::Temporary),
        ];
        for (status, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = open_read(&server, "/x").await.unwrap_err();
            assert_eq!(err.class(), expected, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_503_depends_on_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/later"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "120"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/never"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = open_read(&server, "/later").await.unwrap_err();
        assert_eq!(err.class(), FailureClass::Temporary);

        let err = open_read(&server, "/never").await.unwrap_err();
        assert!(matches!(err, ResourceError::Unavailable(_)));
        assert_eq!(err.class(), FailureClass::Permanent);
    }

    #[tokio::test]
    async fn test_empty_body_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = open_read(&server, "/empty").await.unwrap_err();
        assert!(matches!(err, ResourceError::Empty(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_temporary() {
        let ctx = test_context().await;
        let mut handle = parse_uri("http://127.0.0.1:9/unreachable", &ctx).unwrap();
        let err = handle.open(OpenMode::Read).await.unwrap_err();
        assert!(matches!(err, ResourceError::TemporarilyUnavailable(_)));
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes("late").set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config = StorageConfig {
            endpoint_url: Some("http://127.0.0.1:9".to_string()),
            access_key_id: Some("test".to_string()),
            secret_access_key: Some("test".to_string()),
            http_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let ctx = StorageContext::from_config(&config).await.unwrap();
        let mut handle = parse_uri(&format!("{}/slow.mp4", server.uri()), &ctx).unwrap();
        let err = handle.open(OpenMode::Read).await.unwrap_err();
        handle.close();

        assert!(matches!(err, ResourceError::Timeout(_)), "{:?}", err);
        assert_eq!(err.class(), FailureClass::Temporary);
    }

    #[tokio::test]
    async fn test_save_posts_buffered_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(header("Content-Type", "video/mp4"))
            .and(body_bytes(b"payload".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = test_context().await;
        let mut handle = parse_uri(&format!("{}/upload", server.uri()), &ctx).unwrap();
        let path = handle.open(OpenMode::Write).await.unwrap();
        tokio::fs::write(&path, b"payload").await.unwrap();
        handle.set_content_type(Some("video/mp4".to_string()));
        handle.save().await.unwrap();
        assert!(handle.local_path().is_none());
    }

    #[tokio::test]
    async fn test_save_rejected_is_unexpected_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Content-Type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ctx = test_context().await;
        let mut handle = parse_uri(&format!("{}/upload", server.uri()), &ctx).unwrap();
        handle.open(OpenMode::Write).await.unwrap();
        let err = handle.save().await.unwrap_err();
        assert!(matches!(err, ResourceError::UnexpectedResponse(_)));
        handle.close();
    }
}
