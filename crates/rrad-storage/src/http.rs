//! HTTP download of bulk export results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_concurrent_downloads: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            max_concurrent_downloads: 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("could not build http client: {0}")]
    Client(String),
}

impl FetchError {
    /// Whether a later attempt (the next poll or a re-sync) may succeed.
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Request(err) => classify_reqwest_error(err),
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            Self::Client(_) => RetryDisposition::NonRetryable,
        }
    }
}

/// Source of bulk export result files.
#[async_trait]
pub trait ExportDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<String, FetchError>;
}

/// Plain-HTTP downloader for export result URLs.
///
/// One request per call. Failures surface immediately; the poll loop or an
/// operator re-sync is what tries again.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
        })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        // The semaphore is never closed, so acquisition only fails if that invariant breaks.
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|e| FetchError::Client(e.to_string()))?;

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let err = FetchError::HttpStatus {
                status: status.as_u16(),
                url: redact_query(url),
            };
            warn!(status = status.as_u16(), disposition = ?err.disposition(), "export download failed");
            return Err(err);
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl ExportDownloader for HttpFetcher {
    async fn download(&self, url: &str) -> Result<String, FetchError> {
        let span = info_span!("export_download", url = %redact_query(url));
        self.fetch_text(url).instrument(span).await
    }
}

/// Export URLs are pre-signed; keep the signature out of logs and errors.
fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?…"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serves `503` to the first request and `200 ok` afterwards, counting requests.
    async fn flaky_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply: &[u8] = if n == 0 {
                    b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                } else {
                    b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok"
                };
                let _ = socket.write_all(reply).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/export.jsonl?signature=secret"), hits)
    }

    #[tokio::test]
    async fn server_error_surfaces_on_the_first_attempt() {
        let (url, hits) = flaky_server().await;
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();

        let err = fetcher.download(&url).await.unwrap_err();
        match &err {
            FetchError::HttpStatus { status, url } => {
                assert_eq!(*status, 503);
                assert!(!url.contains("secret"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.disposition(), RetryDisposition::Retryable);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // the next call is a fresh attempt
        assert_eq!(fetcher.download(&url).await.unwrap(), "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn only_server_errors_and_throttling_retry() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[test]
    fn signed_query_strings_are_redacted() {
        assert_eq!(
            redact_query("https://storage.example.com/export.jsonl?X-Goog-Signature=abc"),
            "https://storage.example.com/export.jsonl?…"
        );
        assert_eq!(redact_query("https://a/b"), "https://a/b");
    }
}
