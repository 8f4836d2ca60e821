//! HTTP fetching with per-source headers, timeouts, and retry.
//!
//! One [`HttpFetcher`] (a thin wrapper over a shared `reqwest` blocking
//! client) serves all workers; the per-source timeout is applied per
//! request. Timeouts, connection errors, and non-2xx statuses are all
//! retried with the configured backoff — exhausting the retries surfaces a
//! [`FetchError`] for that source only.
//!
//! The [`FetchSource`] trait is the seam the orchestrator depends on, so
//! tests drive the full pipeline with a canned fetcher.

use crate::catalog::SourceDescriptor;
use crate::config::FetchConfig;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Raw bytes of one fetched revision. Owned by the worker processing the
/// source and discarded after transform (or on failure).
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Abstraction over "download one source's bytes". Production uses
/// [`HttpFetcher`]; orchestrator tests use canned implementations.
pub trait FetchSource: Sync {
    fn fetch(&self, descriptor: &SourceDescriptor) -> Result<FetchResult, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            policy: RetryPolicy::new(
                config.max_retries,
                config.base_delay_ms,
                config.max_delay_ms,
            ),
        })
    }

    fn fetch_once(&self, descriptor: &SourceDescriptor) -> Result<FetchResult, FetchError> {
        let mut request = self
            .client
            .get(&descriptor.url)
            .timeout(descriptor.timeout);
        for (name, value) in &descriptor.headers {
            request = request.header(name, value);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: descriptor.url.clone(),
                status,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = response.bytes()?.to_vec();

        debug!(
            id = %descriptor.id,
            bytes = bytes.len(),
            content_type = content_type.as_deref().unwrap_or("-"),
            "fetched source"
        );
        Ok(FetchResult {
            bytes,
            content_type,
            fetched_at: Utc::now(),
        })
    }
}

impl FetchSource for HttpFetcher {
    /// Fetch with retry. Every fetch failure is considered transient from
    /// the retry policy's point of view; persistent ones exhaust the budget
    /// and surface as the last error.
    fn fetch(&self, descriptor: &SourceDescriptor) -> Result<FetchResult, FetchError> {
        self.policy
            .run(&descriptor.url, |_| true, || self.fetch_once(descriptor))
            .map(|(result, _)| result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformParams;
    use std::collections::BTreeMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Minimal canned HTTP server: answers every connection with the given
    /// status line and body, counting requests.
    fn spawn_server(status_line: &'static str, body: &'static [u8]) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                // drain the request head
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.write_all(body);
            }
        });

        (format!("http://{addr}/image.png"), hits)
    }

    fn descriptor(url: String) -> SourceDescriptor {
        SourceDescriptor {
            id: "test".to_string(),
            url,
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(5),
            output_name: "test.webp".to_string(),
            params: TransformParams::default(),
        }
    }

    fn fetcher(max_retries: u32) -> HttpFetcher {
        HttpFetcher::new(&FetchConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 4,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn fetch_returns_body_and_content_type() {
        let (url, hits) = spawn_server("200 OK", b"fake image bytes");
        let result = fetcher(0).fetch(&descriptor(url)).unwrap();
        assert_eq!(result.bytes, b"fake image bytes");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fetch_retries_on_server_error_then_gives_up() {
        let (url, hits) = spawn_server("500 Internal Server Error", b"");
        let result = fetcher(3).fetch(&descriptor(url));
        assert!(matches!(result, Err(FetchError::Status { .. })));
        // 1 initial + 3 retries
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn fetch_surfaces_404_as_status_error() {
        let (url, _) = spawn_server("404 Not Found", b"");
        let result = fetcher(0).fetch(&descriptor(url));
        match result {
            Err(FetchError::Status { status, .. }) => assert_eq!(status.as_u16(), 404),
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn fetch_connection_refused_is_network_error() {
        // bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = fetcher(1).fetch(&descriptor(format!("http://127.0.0.1:{port}/x.png")));
        assert!(matches!(result, Err(FetchError::Http(_))));
    }
}
