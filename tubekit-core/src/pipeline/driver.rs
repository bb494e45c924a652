//! Per-task pipeline workers.
//!
//! Every task gets one spawned worker that walks it through
//! Downloading, the optional subtitle stages and a terminal stage. Progress
//! flows through a bounded channel into a monitor task, which folds each
//! event into the registry and republishes it on the event bus.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::command::{download_invocation, metadata_invocation, CommandContext, Invocation};
use super::cookies::{self, CookieFile, CookieSource, YtDlpCookieExporter};
use super::metadata::{MetadataCache, VideoMetadata};
use super::runner::{Cancelled, DownloadSample, Extractor, TransferProgress, YtDlpRunner};
use super::stages::{FfmpegEmbedder, PassthroughTranslator, SubtitleEmbedder, SubtitleTranslator};
use super::transcript::{OutputParser, YtDlpOutputParser};
use super::PipelineError;
use crate::config::{PreferenceStore, Settings, DEFAULT_PROGRESS_CAPACITY};
use crate::deps::{DependencyType, ToolResolver};
use crate::events::{EventBus, EventPayload};
use crate::tasks::{
    formats, DownloadRequest, ProgressEvent, QuickDownloadRequest, Stage, Task, TaskError,
    TaskRegistry, TaskSignal, TaskType,
};

/// Runtime knobs read when a worker starts.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Capacity of each task's progress channel.
    pub progress_capacity: usize,
    /// Proxy exported to the extractor.
    pub proxy: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
            proxy: None,
        }
    }
}

impl From<&Settings> for PipelineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            progress_capacity: settings.progress_capacity,
            proxy: settings.proxy_url.clone(),
        }
    }
}

// ============================================================================
// Progress Reporting
// ============================================================================

/// Producer side of a task's progress channel.
struct Reporter {
    task: Task,
    tx: mpsc::Sender<ProgressEvent>,
}

impl Reporter {
    fn event(&self, stage: Stage, percentage: f64, info: &str) -> ProgressEvent {
        ProgressEvent::stage(&self.task, stage, percentage, info)
    }

    /// Queues a transfer sample, dropping it when the channel is full.
    fn sample(&self, event: ProgressEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            trace!(task_id = %self.task.id, "Progress channel full, sample dropped");
        }
    }

    /// Queues a stage or terminal event, waiting for room.
    async fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            warn!(task_id = %self.task.id, "Progress monitor stopped early");
        }
    }
}

/// Transfer speed as `x.xx MB/s`.
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{:.2} MB/s", bytes_per_second / 1_048_576.0)
}

/// Byte count as `x.xx MB`.
pub fn format_size(bytes: f64) -> String {
    format!("{:.2} MB", bytes / 1_048_576.0)
}

/// Remaining time as `1h2m3s`, `2m3s` or `3s`.
pub fn format_eta(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Folds yt-dlp's per-file percentages into one figure for the whole task.
///
/// yt-dlp restarts at 0% for every file it writes, e.g. the video stream and
/// then the audio stream of a merged format. Each finished file counts as one
/// share of the expected file count, and the folded value never decreases.
struct PercentFolder {
    expected: usize,
    finished: usize,
    started: bool,
    current: Option<String>,
    last_percent: f64,
    reported: f64,
}

impl PercentFolder {
    fn new(expected: usize) -> Self {
        Self {
            expected: expected.max(1),
            finished: 0,
            started: false,
            current: None,
            last_percent: 0.0,
            reported: 0.0,
        }
    }

    /// Files a download run will write, judged from its format selector.
    fn for_invocation(invocation: &Invocation) -> Self {
        let expected = invocation
            .value_of("--format")
            .and_then(|selector| selector.split('/').next())
            .map_or(1, |first| first.split('+').count());
        Self::new(expected)
    }

    fn fold(&mut self, progress: &TransferProgress) -> f64 {
        let percent = progress.percent();
        let new_file = self.started
            && match (&self.current, &progress.filename) {
                (Some(current), Some(name)) => current != name,
                _ => percent < self.last_percent,
            };
        if new_file {
            self.finished += 1;
        }
        self.started = true;
        self.current = progress.filename.clone();
        self.last_percent = percent;

        // More files than expected: hold until the folded value catches up
        let files = self.expected.max(self.finished + 1) as f64;
        let overall = (self.finished as f64 * 100.0 + percent) / files;
        self.reported = self.reported.max(overall.min(100.0));
        self.reported
    }
}

fn sample_event(task: &Task, progress: &TransferProgress, percentage: f64) -> ProgressEvent {
    let mut event = ProgressEvent::stage(task, Stage::Downloading, percentage, "Downloading");
    event.speed = progress.bytes_per_second().map(format_speed);
    event.downloaded = progress.downloaded_bytes.map(format_size);
    event.total_size = progress.total().map(format_size);
    event.eta = progress.eta.map(format_eta);
    event
}

/// Directory name for an extractor or task type.
fn dir_name(source: &str) -> String {
    let name: String = source
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Cancelled.into());
    }
    Ok(())
}

/// Resolved executables and scratch space for one run.
struct Prepared {
    root: PathBuf,
    ctx: CommandContext,
    /// Removes the exported cookies when dropped.
    cookies: Option<CookieFile>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Starts and drives download tasks.
///
/// Cheap to clone; clones share workers, caches and the shutdown token.
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<TaskRegistry>,
    bus: EventBus,
    tools: Arc<dyn ToolResolver>,
    prefs: Arc<dyn PreferenceStore>,
    extractor: Arc<dyn Extractor>,
    parser: Arc<dyn OutputParser>,
    cookies: Arc<dyn CookieSource>,
    translator: Arc<dyn SubtitleTranslator>,
    embedder: Arc<dyn SubtitleEmbedder>,
    metadata: Arc<MetadataCache>,
    options: Arc<RwLock<PipelineOptions>>,
    shutdown: CancellationToken,
    workers: TaskTracker,
}

impl Pipeline {
    /// Pipeline running yt-dlp and ffmpeg as resolved by `tools`.
    pub fn new(
        registry: Arc<TaskRegistry>,
        bus: EventBus,
        tools: Arc<dyn ToolResolver>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            registry,
            bus,
            extractor: Arc::new(YtDlpRunner),
            parser: Arc::new(YtDlpOutputParser),
            cookies: Arc::new(YtDlpCookieExporter::new(Arc::clone(&tools))),
            translator: Arc::new(PassthroughTranslator),
            embedder: Arc::new(FfmpegEmbedder::new(Arc::clone(&tools))),
            tools,
            prefs,
            metadata: Arc::new(MetadataCache::new()),
            options: Arc::new(RwLock::new(PipelineOptions::default())),
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_cookies(mut self, cookies: Arc<dyn CookieSource>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn SubtitleTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn SubtitleEmbedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_options(self, options: PipelineOptions) -> Self {
        self.configure(options);
        self
    }

    /// Replaces the options used by workers started from now on.
    pub fn configure(&self, options: PipelineOptions) {
        *self
            .options
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = options;
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Number of workers still running.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    // ========================================================================
    // Entry Points
    // ========================================================================

    /// Creates a custom task and starts its worker. Returns the task id.
    pub async fn start_download(&self, request: DownloadRequest) -> Result<String, PipelineError> {
        validate_url(&request.url)?;
        let recode = resolve_recode(request.recode_format_number)?;
        let task = self
            .create_task(|t| t.apply_request(&request, recode))
            .await?;
        info!(task_id = %task.id, url = %task.url, "Starting download");

        let id = task.id.clone();
        self.spawn(task);
        Ok(id)
    }

    /// Creates a quick or programmatic task and starts its worker.
    pub async fn quick_download(
        &self,
        request: QuickDownloadRequest,
    ) -> Result<String, PipelineError> {
        validate_url(&request.url)?;
        let recode = resolve_recode(request.recode_format_number)?;
        let task = self
            .create_task(|t| t.apply_quick_request(&request, recode))
            .await?;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            url = %task.url,
            "Starting quick download"
        );

        let id = task.id.clone();
        self.spawn(task);
        Ok(id)
    }

    /// Metadata for `url`, from the cache or a metadata-only run.
    pub async fn parse_url(&self, url: &str, browser: &str) -> Result<Arc<VideoMetadata>> {
        validate_url(url)?;
        let prepared = self.prepare(&Uuid::new_v4().to_string(), browser, url).await?;
        self.resolve_metadata(&prepared.ctx, url).await
    }

    /// Cancels every running worker.
    pub fn shutdown(&self) {
        info!(active = self.workers.len(), "Shutting down pipeline");
        self.shutdown.cancel();
    }

    /// Waits until no worker is running.
    pub async fn wait_idle(&self) {
        self.workers.close();
        self.workers.wait().await;
        self.workers.reopen();
    }

    async fn create_task<F>(&self, apply: F) -> Result<Task, PipelineError>
    where
        F: FnOnce(&mut Task),
    {
        let id = Uuid::new_v4().to_string();
        // The record is held in memory even when persisting it fails.
        if let Err(e) = self.registry.create(&id).await {
            warn!(task_id = %id, error = %e, "New task not persisted");
        }
        Ok(self.record(&id, apply).await?)
    }

    /// Applies `f` to a task, tolerating storage failures.
    async fn record<F>(&self, id: &str, f: F) -> Result<Task, TaskError>
    where
        F: FnOnce(&mut Task),
    {
        match self.registry.modify(id, f).await {
            Ok(((), task)) => Ok(task),
            Err(TaskError::NotFound(missing)) => Err(TaskError::NotFound(missing)),
            Err(e) => {
                warn!(task_id = %id, error = %e, "Task update not persisted");
                self.registry.get(id).await
            }
        }
    }

    fn spawn(&self, task: Task) {
        let this = self.clone();
        let cancel = self.shutdown.child_token();
        self.workers.spawn(async move { this.run(task, cancel).await });
    }

    fn signal_info(&self, task_id: &str) {
        self.bus.publish(EventPayload::TaskInfoReady(TaskSignal {
            task_id: task_id.to_string(),
            refresh: true,
        }));
    }

    // ========================================================================
    // Worker
    // ========================================================================

    async fn run(self, task: Task, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel(self.options().progress_capacity);
        let (info_tx, info_rx) = mpsc::channel(1);

        let monitor = tokio::spawn(self.clone().monitor(rx));
        let info_fill = tokio::spawn(self.clone().fill_info(task.id.clone(), info_rx));
        let reporter = Reporter {
            task: task.clone(),
            tx,
        };

        let result = self.drive(&task, &reporter, info_tx, &cancel).await;
        if let Err(e) = info_fill.await {
            warn!(task_id = %task.id, error = %e, "Info fill task failed");
        }

        let terminal = match result {
            Ok(()) => reporter.event(Stage::Completed, 100.0, "Processing completed"),
            Err(e) if cancel.is_cancelled() || e.is::<Cancelled>() => reporter
                .event(Stage::Cancelled, 0.0, "Processing cancelled")
                .with_error(Cancelled.to_string()),
            Err(e) => reporter
                .event(Stage::Failed, 0.0, "Processing failed")
                .with_error(format!("{:#}", e)),
        };
        reporter.send(terminal).await;
        drop(reporter);

        if let Err(e) = monitor.await {
            warn!(task_id = %task.id, error = %e, "Progress monitor failed");
        }
    }

    /// Resolves tools, scratch directories and cookies for a run.
    async fn prepare(&self, key: &str, browser: &str, url: &str) -> Result<Prepared> {
        let root = self
            .prefs
            .download_directory()
            .context("Failed to resolve download directory")?;
        let temp_dir = root.join("temp");
        tokio::fs::create_dir_all(&temp_dir)
            .await
            .with_context(|| format!("Failed to create {}", temp_dir.display()))?;

        let ytdlp = self.tools.executable(DependencyType::YtDlp).await?;
        let ffmpeg = match self.tools.executable(DependencyType::Ffmpeg).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "ffmpeg unavailable, merging and recoding will fail");
                None
            }
        };

        let cookies = cookies::acquire(&*self.cookies, browser, url, &temp_dir, key).await;
        let ctx = CommandContext {
            ytdlp,
            ffmpeg,
            cookies: cookies.as_ref().map(|file| file.path().to_path_buf()),
            proxy: self.options().proxy,
            temp_dir: Some(temp_dir),
        };

        Ok(Prepared { root, ctx, cookies })
    }

    async fn resolve_metadata(&self, ctx: &CommandContext, url: &str) -> Result<Arc<VideoMetadata>> {
        if let Some(hit) = self.metadata.get(url) {
            debug!(url = %url, "Metadata cache hit");
            return Ok(hit);
        }

        let metadata = self
            .extractor
            .fetch_metadata(&metadata_invocation(ctx, url))
            .await
            .context("Failed to fetch video metadata")?;
        Ok(self.metadata.insert(url, metadata))
    }

    async fn drive(
        &self,
        task: &Task,
        reporter: &Reporter,
        info_tx: mpsc::Sender<VideoMetadata>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let id = task.id.as_str();
        let prepared = self.prepare(id, &task.browser, &task.url).await?;

        let metadata = match task.task_type {
            TaskType::Custom => Some(self.resolve_metadata(&prepared.ctx, &task.url).await?),
            TaskType::Quick | TaskType::Programmatic => None,
        };

        let source = metadata
            .as_ref()
            .and_then(|m| m.extractor.clone())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| task.task_type.as_str().to_string());
        let output_dir = prepared.root.join(dir_name(&source));
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let task = self
            .record(id, |t| {
                t.output_dir = output_dir.display().to_string();
                if let Some(meta) = &metadata {
                    meta.apply_core(t);
                    let format_id = t.format_id.clone();
                    if format_id.is_empty() {
                        meta.apply_selected(t);
                    } else {
                        meta.apply_format(t, &format_id);
                    }
                }
            })
            .await?;
        if metadata.is_some() {
            self.signal_info(id);
        }

        // Downloading
        ensure_active(cancel)?;
        reporter
            .send(reporter.event(Stage::Downloading, 0.0, "Start downloading video"))
            .await;

        let invocation = download_invocation(&prepared.ctx, &task, metadata.as_deref());
        let mut folder = PercentFolder::for_invocation(&invocation);
        let mut info_tx = Some(info_tx);
        let mut on_sample = |sample: DownloadSample| {
            if let Some(info) = sample.info.clone() {
                // Taken once, so the single slot is always free here
                if let Some(tx) = info_tx.take() {
                    if let Err(TrySendError::Closed(_)) = tx.try_send(info) {
                        debug!(task_id = %id, "Info fill receiver gone");
                    }
                }
            }
            if cancel.is_cancelled() {
                return;
            }
            let percentage = folder.fold(&sample.progress);
            reporter.sample(sample_event(&reporter.task, &sample.progress, percentage));
        };
        let transcript = self
            .extractor
            .download(&invocation, cancel, &mut on_sample)
            .await?;
        drop(info_tx);
        drop(prepared.cookies);

        let produced = self.parser.parse(&transcript);
        let resolve = |name: &String| output_dir.join(name).display().to_string();
        let task = self
            .record(id, |t| {
                for file in &produced.video_files {
                    push_unique(&mut t.video_files, resolve(file));
                }
                for file in &produced.subtitle_files {
                    push_unique(&mut t.subtitle_files, resolve(file));
                }
                for file in &produced.all_files {
                    t.record_file(resolve(file));
                }
            })
            .await?;
        self.signal_info(id);
        info!(task_id = %id, files = task.all_files.len(), "Download finished");

        if !task.wants_translation() {
            return Ok(());
        }
        let Some(subtitle) = task.subtitle_files.first().cloned() else {
            warn!(task_id = %id, "No subtitles downloaded, skipping translation");
            return Ok(());
        };

        // Translating
        ensure_active(cancel)?;
        reporter
            .send(reporter.event(Stage::Translating, 0.0, "Start translating subtitles"))
            .await;
        let translated = self
            .translator
            .translate(Path::new(&subtitle), &task.translate_to, &task.subtitle_style)
            .await
            .context("Subtitle translation failed")?;
        let translated = translated.display().to_string();
        let task = self
            .record(id, |t| {
                t.translated_files.push(translated.clone());
                t.record_file(translated.clone());
            })
            .await?;

        // Embedding
        ensure_active(cancel)?;
        reporter
            .send(reporter.event(Stage::Embedding, 0.0, "Start embedding subtitles"))
            .await;
        let video = task
            .video_files
            .first()
            .cloned()
            .context("No video file to embed subtitles into")?;
        let embedded = self
            .embedder
            .embed(Path::new(&video), Path::new(&translated), &task.translate_to)
            .await
            .context("Subtitle embedding failed")?;
        let embedded = embedded.display().to_string();
        self.record(id, |t| {
            t.embedded_files.push(embedded.clone());
            t.record_file(embedded.clone());
        })
        .await?;

        Ok(())
    }

    /// Folds the first metadata sample into the task.
    async fn fill_info(self, task_id: String, mut rx: mpsc::Receiver<VideoMetadata>) {
        let Some(meta) = rx.recv().await else {
            return;
        };

        let result = self
            .record(&task_id, |t| {
                meta.apply_core(t);
                if t.format.is_empty() {
                    meta.apply_selected(t);
                }
            })
            .await;

        match result {
            Ok(_) => {
                debug!(task_id = %task_id, "Task metadata filled");
                self.signal_info(&task_id);
            }
            Err(e) => warn!(task_id = %task_id, error = %e, "Failed to fill task metadata"),
        }
    }

    /// Applies queued progress to the registry and republishes it.
    async fn monitor(self, mut rx: mpsc::Receiver<ProgressEvent>) {
        while let Some(event) = rx.recv().await {
            let publish = match self
                .registry
                .modify(&event.id, |t| t.apply_progress(&event))
                .await
            {
                Ok((applied, _)) => applied,
                Err(TaskError::NotFound(id)) => {
                    warn!(task_id = %id, "Progress for unknown task");
                    false
                }
                Err(e) => {
                    warn!(task_id = %event.id, error = %e, "Progress not persisted");
                    true
                }
            };

            match event.stage {
                Stage::Completed => info!(task_id = %event.id, "Task completed"),
                Stage::Failed | Stage::Cancelled => warn!(
                    task_id = %event.id,
                    stage = %event.stage,
                    error = event.error.as_deref().unwrap_or_default(),
                    "Task stopped"
                ),
                stage => debug!(
                    task_id = %event.id,
                    stage = %stage,
                    percentage = event.percentage,
                    "Progress"
                ),
            }

            if publish {
                self.bus.publish(EventPayload::TaskProgress(event));
            } else {
                debug!(task_id = %event.id, stage = %event.stage, "Skipped stale progress");
            }
        }
    }
}

fn resolve_recode(format_id: u32) -> Result<Option<&'static str>, PipelineError> {
    formats::recode_extension(format_id).map_err(|e| PipelineError::InvalidRequest(e.to_string()))
}

fn validate_url(url: &str) -> Result<(), PipelineError> {
    if url.trim().is_empty() {
        return Err(PipelineError::InvalidRequest("url is required".to_string()));
    }
    url::Url::parse(url.trim())
        .map_err(|e| PipelineError::InvalidRequest(format!("invalid url {}: {}", url, e)))?;
    Ok(())
}
