//! Download pipeline.
//!
//! A task moves `Initializing -> Downloading -> [Translating -> Embedding]
//! -> Completed`, or ends in `Failed` / `Cancelled` from any active stage.
//! The subtitle stages run only for custom tasks that download subtitles and
//! name a target language.
//!
//! # Architecture
//!
//! - `metadata`: Extractor metadata and the per-process metadata cache
//! - `command`: yt-dlp argument building (`Invocation`)
//! - `runner`: Child process execution behind the `Extractor` trait
//! - `transcript`: Produced-file recovery behind the `OutputParser` trait
//! - `cookies`: Browser cookie export with scoped cookie files
//! - `stages`: Subtitle translation and embedding
//! - `driver`: Per-task workers, progress monitor and info fill
//!
//! # Example
//!
//! ```ignore
//! use tubekit_core::pipeline::Pipeline;
//! use tubekit_core::tasks::DownloadRequest;
//!
//! let pipeline = Pipeline::new(registry, bus.clone(), manager, prefs);
//! let id = pipeline.start_download(DownloadRequest {
//!     url: "https://example.com/v1".into(),
//!     ..Default::default()
//! }).await?;
//! // Progress arrives on the bus under `task.progress`
//! ```

pub mod command;
pub mod cookies;
pub mod driver;
pub mod metadata;
pub mod runner;
pub mod stages;
pub mod transcript;

pub use command::{CommandContext, Invocation};
pub use cookies::{CookieFile, CookieSource, YtDlpCookieExporter};
pub use driver::{Pipeline, PipelineOptions};
pub use metadata::{FormatInfo, MetadataCache, VideoMetadata};
pub use runner::{Cancelled, DownloadSample, Extractor, TransferProgress, YtDlpRunner};
pub use stages::{FfmpegEmbedder, PassthroughTranslator, SubtitleEmbedder, SubtitleTranslator};
pub use transcript::{OutputParser, ProducedFiles, YtDlpOutputParser};

use thiserror::Error;

use crate::tasks::TaskError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Task(#[from] TaskError),
}
