//! Task records, stages and progress notifications.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Stage
// ============================================================================

/// Phase of a task's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initializing,
    Downloading,
    Translating,
    Embedding,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Downloading => "downloading",
            Self::Translating => "translating",
            Self::Embedding => "embedding",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed and Cancelled never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is reachable from `self` in one step.
    ///
    /// Staying in the same active stage is allowed so progress samples can be
    /// folded in repeatedly.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == next || matches!(next, Self::Failed | Self::Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Self::Initializing, Self::Downloading)
                | (Self::Downloading, Self::Translating)
                | (Self::Downloading, Self::Completed)
                | (Self::Translating, Self::Embedding)
                | (Self::Embedding, Self::Completed)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Task Type
// ============================================================================

/// How a task was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Full request with explicit format and subtitle choices.
    #[default]
    Custom,
    /// One-click download with `best` defaults.
    Quick,
    /// Requested by another program rather than a person.
    Programmatic,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Quick => "quick",
            Self::Programmatic => "programmatic",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A full download request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadRequest {
    pub url: String,
    /// Browser to export cookies from. Empty means no cookies.
    pub browser: String,
    /// Extractor format id. Empty lets the extractor choose.
    pub format_id: String,
    pub download_subs: bool,
    pub sub_langs: Vec<String>,
    pub sub_format: String,
    /// Target language for subtitle translation. Empty disables translation.
    pub translate_to: String,
    /// Layout hint for translated subtitles, handed to the translator.
    pub subtitle_style: String,
    /// Conversion format id to recode into after download. `0` keeps the
    /// downloaded container.
    pub recode_format_number: u32,
}

/// A one-click download request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuickDownloadRequest {
    pub url: String,
    pub browser: String,
    /// Format selector passed to the extractor, `best` by default.
    pub video: String,
    /// Also fetch the best available captions.
    pub best_caption: bool,
    pub recode_format_number: u32,
    pub task_type: TaskType,
}

impl Default for QuickDownloadRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            browser: String::new(),
            video: "best".to_string(),
            best_caption: false,
            recode_format_number: 0,
            task_type: TaskType::Quick,
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// One orchestrated download job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub stage: Stage,

    // Request
    pub url: String,
    pub browser: String,
    pub format_id: String,
    pub download_subs: bool,
    pub sub_langs: Vec<String>,
    pub sub_format: String,
    pub translate_to: String,
    pub subtitle_style: String,
    pub recode_format_number: u32,
    /// Extension resolved from `recode_format_number`.
    pub recode_extension: Option<String>,

    // Metadata
    pub extractor: String,
    pub title: String,
    pub uploader: String,
    pub duration: f64,
    pub thumbnail: String,
    pub format: String,
    pub resolution: String,
    pub file_size: i64,

    // Progress
    pub output_dir: String,
    pub percentage: f64,
    pub speed: String,
    pub eta: String,

    // Produced files
    pub video_files: Vec<String>,
    pub subtitle_files: Vec<String>,
    pub translated_files: Vec<String>,
    pub embedded_files: Vec<String>,
    pub all_files: Vec<String>,

    pub error: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: String::new(),
            task_type: TaskType::Custom,
            stage: Stage::Initializing,
            url: String::new(),
            browser: String::new(),
            format_id: String::new(),
            download_subs: false,
            sub_langs: Vec::new(),
            sub_format: String::new(),
            translate_to: String::new(),
            subtitle_style: String::new(),
            recode_format_number: 0,
            recode_extension: None,
            extractor: String::new(),
            title: String::new(),
            uploader: String::new(),
            duration: 0.0,
            thumbnail: String::new(),
            format: String::new(),
            resolution: String::new(),
            file_size: 0,
            output_dir: String::new(),
            percentage: 0.0,
            speed: String::new(),
            eta: String::new(),
            video_files: Vec::new(),
            subtitle_files: Vec::new(),
            translated_files: Vec::new(),
            embedded_files: Vec::new(),
            all_files: Vec::new(),
            error: None,
            created_at: 0,
            updated_at: 0,
        }
    }
}

impl Task {
    /// A fresh task in the Initializing stage.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// Copy the request fields of a full download request.
    ///
    /// `recode` is the extension already resolved from the request's format id.
    pub fn apply_request(&mut self, request: &DownloadRequest, recode: Option<&str>) {
        self.task_type = TaskType::Custom;
        self.url = request.url.clone();
        self.browser = request.browser.clone();
        self.format_id = request.format_id.clone();
        self.download_subs = request.download_subs;
        self.sub_langs = request.sub_langs.clone();
        self.sub_format = request.sub_format.clone();
        self.translate_to = request.translate_to.clone();
        self.subtitle_style = request.subtitle_style.clone();
        self.recode_format_number = request.recode_format_number;
        self.recode_extension = recode.map(str::to_string);
    }

    /// Copy the request fields of a quick download request.
    pub fn apply_quick_request(&mut self, request: &QuickDownloadRequest, recode: Option<&str>) {
        self.task_type = match request.task_type {
            TaskType::Custom => TaskType::Quick,
            other => other,
        };
        self.url = request.url.clone();
        self.browser = request.browser.clone();
        self.format_id = request.video.clone();
        self.download_subs = request.best_caption;
        self.sub_format = if request.best_caption {
            "best".to_string()
        } else {
            String::new()
        };
        self.recode_format_number = request.recode_format_number;
        self.recode_extension = recode.map(str::to_string);
    }

    /// Translating and Embedding run only for custom tasks that download
    /// subtitles and name a target language.
    pub fn wants_translation(&self) -> bool {
        self.task_type == TaskType::Custom && self.download_subs && !self.translate_to.is_empty()
    }

    /// Refresh `updated_at`, never moving it before `created_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp_millis().max(self.created_at);
    }

    /// Move to `next` if the stage graph allows it.
    ///
    /// Returns `false` and leaves the task untouched otherwise.
    pub fn transition(&mut self, next: Stage) -> bool {
        if !self.stage.can_transition_to(next) {
            return false;
        }
        self.stage = next;
        true
    }

    /// Record a failure and move to Failed.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.transition(Stage::Failed) {
            return false;
        }
        self.error = Some(error.into());
        true
    }

    /// Fold a progress sample into the record.
    ///
    /// Samples that would move the task to an earlier stage, out of a terminal
    /// stage, or to a lower percentage within the current stage are ignored.
    /// Terminal events always carry their own percentage.
    pub fn apply_progress(&mut self, event: &ProgressEvent) -> bool {
        let regressed = !event.stage.is_terminal()
            && event.stage == self.stage
            && event.percentage < self.percentage;
        if regressed || !self.transition(event.stage) {
            return false;
        }
        self.percentage = event.percentage;
        if let Some(speed) = &event.speed {
            self.speed = speed.clone();
        }
        if let Some(eta) = &event.eta {
            self.eta = eta.clone();
        }
        if let Some(error) = &event.error {
            self.error = Some(error.clone());
        }
        true
    }

    /// Append a produced file, keeping `all_files` free of duplicates.
    pub fn record_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.all_files.contains(&path) {
            self.all_files.push(path);
        }
    }
}

// ============================================================================
// Progress Notifications
// ============================================================================

/// Transient progress notification for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub stage: Stage,
    pub percentage: f64,
    pub stage_info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
}

impl ProgressEvent {
    /// A stage notification without transfer statistics.
    pub fn stage(task: &Task, stage: Stage, percentage: f64, info: impl Into<String>) -> Self {
        Self {
            id: task.id.clone(),
            task_type: task.task_type,
            stage,
            percentage,
            stage_info: info.into(),
            error: None,
            speed: None,
            downloaded: None,
            total_size: None,
            eta: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Tells subscribers that a task's metadata became available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSignal {
    pub task_id: String,
    /// Subscriber should re-fetch the full task.
    pub refresh: bool,
}
