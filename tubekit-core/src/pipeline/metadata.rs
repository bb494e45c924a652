//! Extractor metadata and the per-process metadata cache.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::tasks::Task;

// ============================================================================
// Metadata
// ============================================================================

/// One downloadable format offered for a video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatInfo {
    pub format_id: String,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    pub resolution: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
}

impl FormatInfo {
    /// A video-only stream that needs a separate audio track.
    pub fn is_video_only(&self) -> bool {
        let has = |codec: &Option<String>| codec.as_deref().is_some_and(|c| c != "none");
        has(&self.vcodec) && !has(&self.acodec)
    }
}

/// Video metadata as reported by the extractor.
///
/// Every field is optional; sites differ wildly in what they report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoMetadata {
    pub extractor: Option<String>,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    /// Set instead of `uploader` for episodic content.
    pub series: Option<String>,
    pub duration: Option<f64>,
    pub ext: Option<String>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    pub resolution: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub formats: Vec<FormatInfo>,
}

fn resolution_label(
    resolution: &Option<String>,
    width: Option<u64>,
    height: Option<u64>,
) -> String {
    match (resolution, width, height) {
        (Some(resolution), _, _) => resolution.clone(),
        (None, Some(width), Some(height)) => format!("{} x {}", width, height),
        _ => "Unknown".to_string(),
    }
}

fn size_of(approx: Option<f64>, exact: Option<f64>) -> i64 {
    approx.or(exact).map(|size| size as i64).unwrap_or(0)
}

impl VideoMetadata {
    /// Uploader, falling back to the series name and then the extractor.
    pub fn uploader_label(&self) -> String {
        self.uploader
            .clone()
            .or_else(|| self.series.clone())
            .or_else(|| self.extractor.clone())
            .unwrap_or_default()
    }

    pub fn format(&self, format_id: &str) -> Option<&FormatInfo> {
        self.formats.iter().find(|f| f.format_id == format_id)
    }

    /// Copies the core descriptive fields onto `task`.
    pub fn apply_core(&self, task: &mut Task) {
        if let Some(extractor) = &self.extractor {
            task.extractor = extractor.clone();
        }
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(thumbnail) = &self.thumbnail {
            task.thumbnail = thumbnail.clone();
        }
        task.uploader = self.uploader_label();
        task.duration = self.duration.unwrap_or_default();
    }

    /// Copies container, size and resolution of the chosen format.
    pub fn apply_format(&self, task: &mut Task, format_id: &str) {
        if let Some(format) = self.format(format_id) {
            task.format = format.ext.clone().unwrap_or_default();
            task.file_size = size_of(format.filesize_approx, format.filesize);
            task.resolution = resolution_label(&format.resolution, format.width, format.height);
        }
    }

    /// Copies container, size and resolution of the top-level entry.
    pub fn apply_selected(&self, task: &mut Task) {
        task.format = self.ext.clone().unwrap_or_default();
        task.file_size = size_of(self.filesize_approx, self.filesize);
        task.resolution = resolution_label(&self.resolution, self.width, self.height);
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Best-effort memoization of metadata by URL.
///
/// Lookups and inserts are individually locked, but a fetch is not: two
/// callers missing on the same URL at once both fetch and the later insert
/// wins. Entries are never evicted.
#[derive(Default)]
pub struct MetadataCache {
    entries: Mutex<HashMap<String, Arc<VideoMetadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<Arc<VideoMetadata>> {
        self.lock().get(url).cloned()
    }

    pub fn insert(&self, url: &str, metadata: VideoMetadata) -> Arc<VideoMetadata> {
        let metadata = Arc::new(metadata);
        self.lock().insert(url.to_string(), Arc::clone(&metadata));
        debug!(url = %url, "Cached metadata");
        metadata
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<VideoMetadata>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
