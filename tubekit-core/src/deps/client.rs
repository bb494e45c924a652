//! HTTP access for release lookups and binary downloads.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;

/// A response body being streamed.
pub struct ByteStream {
    /// Total bytes expected (from Content-Length), if known.
    pub total_bytes: Option<u64>,
    pub chunks: BoxStream<'static, Result<Vec<u8>>>,
}

/// Network access used by the dependency manager.
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    /// GET a small text document (release metadata).
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// GET a large body as a stream of chunks.
    async fn open_stream(&self, url: &str) -> Result<ByteStream>;
}

// ============================================================================
// reqwest Client
// ============================================================================

/// [`ReleaseClient`] backed by `reqwest`.
pub struct HttpReleaseClient {
    client: reqwest::Client,
}

impl HttpReleaseClient {
    /// Builds a client, routing through `proxy` when given.
    pub fn new(proxy: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("tubekit/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30));

        if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
            let proxy =
                reqwest::Proxy::all(proxy).with_context(|| format!("Invalid proxy: {}", proxy))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "Request to {} failed with status {}: {}",
                url,
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown error")
            );
        }

        Ok(response)
    }
}

#[async_trait]
impl ReleaseClient for HttpReleaseClient {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.get(url).await?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", url))
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream> {
        let response = self.get(url).await?;
        let total_bytes = response.content_length();

        let chunks = response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(|e| anyhow::Error::new(e).context("Failed to read chunk from response stream"))
            .boxed();

        Ok(ByteStream {
            total_bytes,
            chunks,
        })
    }
}

// ============================================================================
// Test Double
// ============================================================================

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A canned response body.
    #[derive(Clone, Default)]
    pub struct FakeBody {
        pub chunks: Vec<Vec<u8>>,
        /// Advertised Content-Length.
        pub total: Option<u64>,
        /// Yield an error after this many chunks.
        pub fail_after: Option<usize>,
    }

    impl FakeBody {
        /// `len` bytes split into `parts` chunks with a correct length header.
        pub fn sized(len: usize, parts: usize) -> Self {
            let data = vec![b'x'; len];
            let chunk = (len / parts).max(1);
            Self {
                chunks: data.chunks(chunk).map(<[u8]>::to_vec).collect(),
                total: Some(len as u64),
                fail_after: None,
            }
        }
    }

    /// In-memory [`ReleaseClient`].
    #[derive(Default)]
    pub struct FakeReleaseClient {
        texts: Mutex<HashMap<String, String>>,
        bodies: Mutex<HashMap<String, FakeBody>>,
    }

    impl FakeReleaseClient {
        pub fn with_text(self, url: &str, text: &str) -> Self {
            self.texts
                .lock()
                .unwrap()
                .insert(url.to_string(), text.to_string());
            self
        }

        pub fn with_body(self, url: &str, body: FakeBody) -> Self {
            self.bodies.lock().unwrap().insert(url.to_string(), body);
            self
        }
    }

    #[async_trait]
    impl ReleaseClient for FakeReleaseClient {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            self.texts
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 for {}", url))
        }

        async fn open_stream(&self, url: &str) -> Result<ByteStream> {
            let body = self
                .bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 for {}", url))?;

            let fail_after = body.fail_after;
            let mut items: Vec<Result<Vec<u8>>> = Vec::new();
            for (i, chunk) in body.chunks.into_iter().enumerate() {
                if fail_after == Some(i) {
                    items.push(Err(anyhow::anyhow!("connection reset")));
                    break;
                }
                items.push(Ok(chunk));
            }

            Ok(ByteStream {
                total_bytes: body.total,
                chunks: futures::stream::iter(items).boxed(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_without_proxy() {
        assert!(HttpReleaseClient::new(None).is_ok());
        assert!(HttpReleaseClient::new(Some("  ")).is_ok());
    }

    #[test]
    fn test_client_accepts_http_proxy() {
        assert!(HttpReleaseClient::new(Some("http://127.0.0.1:7890")).is_ok());
    }
}
