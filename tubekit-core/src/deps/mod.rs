//! External dependency management for yt-dlp and ffmpeg.
//!
//! Binaries are checked on the host, downloaded on demand from a mirror and
//! kept under the user cache directory. Install state is persisted through
//! the [`PreferenceStore`](crate::config::PreferenceStore).
//!
//! # Architecture
//!
//! - `types`: Core types (DependencyType, Platform, DependencyInfo, errors)
//! - `version`: Release tag parsing and ordering
//! - `catalog`: Mirror tables with download URL templates
//! - `paths`: Cache directory resolution and search-path probing
//! - `providers`: Per-dependency install layout and detection
//! - `client`: HTTP access behind the `ReleaseClient` trait
//! - `downloader`: Streaming download with integer-percent progress
//! - `extractor`: Archive extraction and executable placement
//! - `manager`: High-level check/install/update API
//!
//! # Example
//!
//! ```ignore
//! use tubekit_core::deps::{DependencyManager, DependencyType, DownloadConfig};
//!
//! let manager = DependencyManager::for_host(store, client, bus)?;
//! let info = manager.install(DependencyType::YtDlp, DownloadConfig::default()).await?;
//! println!("yt-dlp {} at {:?}", info.version, info.exec_path);
//! ```

pub mod catalog;
pub mod client;
pub mod downloader;
pub mod extractor;
pub mod manager;
pub mod paths;
pub mod providers;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use catalog::Mirror;
pub use client::{HttpReleaseClient, ReleaseClient};
pub use manager::{DependencyManager, ToolResolver};
pub use types::{
    ArchiveFormat, DependencyError, DependencyInfo, DependencyProgress, DependencyStage,
    DependencyType, DownloadConfig, Platform,
};
pub use version::VersionError;
