//! Running the extractor as a child process.
//!
//! Progress arrives on stdout as `[tubekit] <progress json> <info json>`
//! lines (see [`PROGRESS_PREFIX`]); every other stdout line is kept as the
//! transcript for [`OutputParser`](super::transcript::OutputParser).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::command::{Invocation, PROGRESS_PREFIX};
use super::metadata::VideoMetadata;

/// Stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// The run was stopped through its cancellation token.
#[derive(Debug, Error)]
#[error("download cancelled")]
pub struct Cancelled;

// ============================================================================
// Progress Samples
// ============================================================================

/// yt-dlp's progress dictionary.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransferProgress {
    pub status: Option<String>,
    pub downloaded_bytes: Option<f64>,
    pub total_bytes: Option<f64>,
    pub total_bytes_estimate: Option<f64>,
    /// Bytes per second.
    pub speed: Option<f64>,
    /// Seconds remaining.
    pub eta: Option<f64>,
    /// Seconds since this file's transfer started.
    pub elapsed: Option<f64>,
    /// File being written. yt-dlp reports each requested format separately.
    pub filename: Option<String>,
}

impl TransferProgress {
    pub fn total(&self) -> Option<f64> {
        self.total_bytes
            .or(self.total_bytes_estimate)
            .filter(|t| *t > 0.0)
    }

    /// Percentage of the current file, 0 when the size is unknown.
    pub fn percent(&self) -> f64 {
        match (self.downloaded_bytes, self.total()) {
            (Some(done), Some(total)) => (done / total * 100.0).clamp(0.0, 100.0),
            _ => 0.0,
        }
    }

    /// Reported speed, or the average since the transfer started.
    pub fn bytes_per_second(&self) -> Option<f64> {
        self.speed.or_else(|| match (self.downloaded_bytes, self.elapsed) {
            (Some(done), Some(elapsed)) if elapsed > 0.0 => Some(done / elapsed),
            _ => None,
        })
    }
}

/// One progress line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadSample {
    pub progress: TransferProgress,
    /// Metadata of the entry being downloaded.
    pub info: Option<VideoMetadata>,
}

/// Parses a `[tubekit] {...} {...}` line.
pub fn parse_progress_line(line: &str) -> Option<DownloadSample> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?.trim_start();
    let mut docs = serde_json::Deserializer::from_str(rest).into_iter::<serde_json::Value>();

    let progress = serde_json::from_value(docs.next()?.ok()?).ok()?;
    let info = docs
        .next()
        .and_then(|doc| doc.ok())
        .filter(|doc| doc.is_object())
        .and_then(|doc| serde_json::from_value(doc).ok());

    Some(DownloadSample { progress, info })
}

// ============================================================================
// Extractor
// ============================================================================

/// Process boundary of the pipeline.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Runs a metadata-only invocation and parses its JSON.
    async fn fetch_metadata(&self, invocation: &Invocation) -> Result<VideoMetadata>;

    /// Runs a download, feeding progress samples to `on_sample`.
    ///
    /// Returns the non-progress stdout. Fails on a non-zero exit, and with
    /// [`Cancelled`] once `cancel` fires.
    async fn download(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        on_sample: &mut (dyn FnMut(DownloadSample) + Send),
    ) -> Result<String>;
}

/// [`Extractor`] that spawns the yt-dlp binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct YtDlpRunner;

/// Reads `reader` to the end, keeping the last few lines.
async fn tail_lines<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut segments = BufReader::new(reader).split(b'\n');
    while let Ok(Some(segment)) = segments.next_segment().await {
        let line = String::from_utf8_lossy(&segment).trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

#[async_trait]
impl Extractor for YtDlpRunner {
    async fn fetch_metadata(&self, invocation: &Invocation) -> Result<VideoMetadata> {
        debug!(program = %invocation.program.display(), "Fetching metadata");

        let output = invocation
            .to_command()
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", invocation.program.display()))?;

        if !output.status.success() {
            let stderr = tail_lines(&output.stderr[..]).await;
            anyhow::bail!("yt-dlp exited with {}: {}", output.status, stderr);
        }

        serde_json::from_slice(&output.stdout).context("Failed to parse yt-dlp metadata")
    }

    async fn download(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        on_sample: &mut (dyn FnMut(DownloadSample) + Send),
    ) -> Result<String> {
        debug!(
            program = %invocation.program.display(),
            args = ?invocation.args,
            "Starting download"
        );

        let mut child = invocation
            .to_command()
            .spawn()
            .with_context(|| format!("Failed to spawn {}", invocation.program.display()))?;

        let stdout = child.stdout.take().context("yt-dlp stdout not captured")?;
        let stderr = child.stderr.take().context("yt-dlp stderr not captured")?;
        let stderr_task = tokio::spawn(tail_lines(stderr));

        let mut transcript = String::new();
        let mut segments = BufReader::new(stdout).split(b'\n');

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Download cancelled, stopping yt-dlp");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill yt-dlp");
                    }
                    stderr_task.abort();
                    return Err(Cancelled.into());
                }
                segment = segments.next_segment() => {
                    let Some(segment) = segment.context("Failed to read yt-dlp output")? else {
                        break;
                    };
                    let line = String::from_utf8_lossy(&segment);
                    match parse_progress_line(&line) {
                        Some(sample) => on_sample(sample),
                        None => {
                            transcript.push_str(line.trim_end_matches('\r'));
                            transcript.push('\n');
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill yt-dlp");
                }
                stderr_task.abort();
                return Err(Cancelled.into());
            }
            status = child.wait() => status.context("Failed to wait for yt-dlp")?,
        };

        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            anyhow::bail!("yt-dlp exited with {}: {}", status, stderr);
        }

        Ok(transcript)
    }
}
