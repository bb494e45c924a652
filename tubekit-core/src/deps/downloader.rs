//! Streaming binary downloader with progress reporting and URL validation.
//!
//! Bodies are written chunk by chunk into a caller-provided staging file.
//! Progress is reported only when the integer percentage grows, which bounds
//! the number of events to at most 100 per download.

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::client::ReleaseClient;

// ============================================================================
// URL Security Validation
// ============================================================================

/// Allowed domains for downloading dependencies.
const ALLOWED_DOMAINS: &[&str] = &[
    "github.com",
    "githubusercontent.com",
    "gh-proxy.com",
    "evermeet.cx",
];

/// Validates that a URL is safe for downloading.
///
/// Checks:
/// - URL scheme must be HTTPS
/// - Host must be in the allowed domain list
pub fn validate_url(url_str: &str) -> Result<()> {
    let url = Url::parse(url_str).with_context(|| format!("Invalid URL: {}", url_str))?;

    if url.scheme() != "https" {
        anyhow::bail!("URL must use HTTPS: {}", url_str);
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL must have a host: {}", url_str))?;

    // Subdomains of an allowed domain are fine too
    let is_allowed = ALLOWED_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)));

    if !is_allowed {
        anyhow::bail!(
            "Download domain not allowed: {}. Allowed: {:?}",
            host,
            ALLOWED_DOMAINS
        );
    }

    Ok(())
}

// ============================================================================
// Progress Tracking
// ============================================================================

/// Turns byte counts into integer percentages, reporting each value once.
#[derive(Debug)]
struct PercentTracker {
    total_bytes: Option<u64>,
    last_reported: u8,
}

impl PercentTracker {
    fn new(total_bytes: Option<u64>) -> Self {
        Self {
            total_bytes,
            last_reported: 0,
        }
    }

    /// The new percentage, if it increased since the last report.
    fn advance(&mut self, bytes_downloaded: u64) -> Option<u8> {
        let total = self.total_bytes.filter(|t| *t > 0)?;
        let percent = (bytes_downloaded.saturating_mul(100) / total).min(100) as u8;
        if percent > self.last_reported {
            self.last_reported = percent;
            Some(percent)
        } else {
            None
        }
    }
}

// ============================================================================
// Download Function
// ============================================================================

/// Streams `url` into `file`, invoking `on_percent` on each integer increase.
///
/// Returns the number of bytes written. Fails if the transfer is cut short,
/// including when the stream ends before the advertised length; the caller
/// owns the staging file and discards it on error.
pub async fn download_to<F>(
    client: &dyn ReleaseClient,
    url: &str,
    file: &mut File,
    mut on_percent: F,
) -> Result<u64>
where
    F: FnMut(u8),
{
    info!("Downloading {}", url);

    validate_url(url)?;

    let body = client.open_stream(url).await?;
    debug!("Content-Length: {:?}", body.total_bytes);

    let mut tracker = PercentTracker::new(body.total_bytes);
    let mut stream = body.chunks;
    let mut bytes_downloaded: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.with_context(|| format!("Download of {} interrupted", url))?;

        file.write_all(&chunk)
            .await
            .context("Failed to write chunk to file")?;

        bytes_downloaded += chunk.len() as u64;
        if let Some(percent) = tracker.advance(bytes_downloaded) {
            on_percent(percent);
        }
    }

    file.flush().await.context("Failed to flush file")?;

    if let Some(total) = body.total_bytes {
        if bytes_downloaded != total {
            anyhow::bail!(
                "Download of {} truncated: received {} of {} bytes",
                url,
                bytes_downloaded,
                total
            );
        }
    }

    info!("Download complete: {} bytes from {}", bytes_downloaded, url);
    Ok(bytes_downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::client::fake::{FakeBody, FakeReleaseClient};
    use tempfile::TempDir;

    const URL: &str = "https://github.com/yt-dlp/yt-dlp/releases/download/1/yt-dlp_linux";

    async fn staging(dir: &TempDir) -> (std::path::PathBuf, File) {
        let path = dir.path().join("staging.part");
        let file = File::create(&path).await.unwrap();
        (path, file)
    }

    #[test]
    fn test_percent_tracker_reports_increases_only() {
        let mut tracker = PercentTracker::new(Some(1000));
        assert_eq!(tracker.advance(5), None);
        assert_eq!(tracker.advance(10), Some(1));
        assert_eq!(tracker.advance(15), None);
        assert_eq!(tracker.advance(999), Some(99));
        assert_eq!(tracker.advance(1000), Some(100));
        assert_eq!(tracker.advance(1000), None);
    }

    #[test]
    fn test_percent_tracker_unknown_total() {
        let mut tracker = PercentTracker::new(None);
        assert_eq!(tracker.advance(500), None);
        let mut zero = PercentTracker::new(Some(0));
        assert_eq!(zero.advance(0), None);
    }

    #[test]
    fn test_validate_url_https_required() {
        assert!(validate_url("http://github.com/file").is_err());
        assert!(validate_url("https://github.com/file").is_ok());
    }

    #[test]
    fn test_validate_url_allowed_domains() {
        assert!(validate_url("https://gh-proxy.com/github.com/yt-dlp/yt-dlp/x").is_ok());
        assert!(validate_url("https://evermeet.cx/ffmpeg/ffmpeg-7.1.zip").is_ok());
        assert!(
            validate_url("https://objects.githubusercontent.com/release-asset").is_ok()
        );

        assert!(validate_url("https://evil.com/malware").is_err());
        assert!(validate_url("https://github.com.evil.org/fake").is_err());
        assert!(validate_url("not-a-url").is_err());
    }

    #[tokio::test]
    async fn test_download_reports_monotonic_integer_percent() {
        let dir = TempDir::new().unwrap();
        let client = FakeReleaseClient::default().with_body(URL, FakeBody::sized(1000, 250));
        let (path, mut file) = staging(&dir).await;

        let mut seen = Vec::new();
        let written = download_to(&client, URL, &mut file, |p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(written, 1000);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1000);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.len() <= 100);
    }

    #[tokio::test]
    async fn test_download_interrupted_mid_stream() {
        let dir = TempDir::new().unwrap();
        let body = FakeBody {
            fail_after: Some(3),
            ..FakeBody::sized(1000, 10)
        };
        let client = FakeReleaseClient::default().with_body(URL, body);
        let (_path, mut file) = staging(&dir).await;

        let err = download_to(&client, URL, &mut file, |_| {})
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("interrupted"));
    }

    #[tokio::test]
    async fn test_download_truncated_body_fails() {
        let dir = TempDir::new().unwrap();
        let body = FakeBody {
            total: Some(5000),
            ..FakeBody::sized(1000, 4)
        };
        let client = FakeReleaseClient::default().with_body(URL, body);
        let (_path, mut file) = staging(&dir).await;

        let err = download_to(&client, URL, &mut file, |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[tokio::test]
    async fn test_download_rejects_disallowed_url() {
        let dir = TempDir::new().unwrap();
        let client = FakeReleaseClient::default();
        let (_path, mut file) = staging(&dir).await;

        assert!(
            download_to(&client, "https://example.org/yt-dlp", &mut file, |_| {})
                .await
                .is_err()
        );
    }
}
