//! Orchestration engine facade.
//!
//! `Engine` builds every component from one database handle and exposes the
//! command surface used by front ends. Commands return immediately with a
//! [`CommandResponse`]; long-running work is observed through the event bus.

use anyhow::{bail, Context};
use futures::StreamExt;
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::{Database, SharedDatabase};
use crate::deps::{
    DependencyInfo, DependencyManager, DependencyType, DownloadConfig, HttpReleaseClient,
    Platform, ReleaseClient, ToolResolver,
};
use crate::events::{BusEvent, EventBus};
use crate::pipeline::{Pipeline, PipelineOptions, VideoMetadata};
use crate::tasks::{
    formats, ConversionFormats, DownloadRequest, QuickDownloadRequest, Task, TaskRegistry,
};

/// Largest thumbnail accepted into the cache.
const MAX_THUMBNAIL_BYTES: usize = 8 * 1024 * 1024;

/// Result envelope of every engine command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> CommandResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    fn from_result<E: Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// Id of a task that was just started.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHandle {
    pub task_id: String,
}

// ============================================================================
// Engine
// ============================================================================

/// Task orchestration engine.
pub struct Engine {
    db: SharedDatabase,
    settings: Mutex<Settings>,
    bus: EventBus,
    registry: Arc<TaskRegistry>,
    deps: Arc<DependencyManager>,
    pipeline: Pipeline,
    client: Arc<dyn ReleaseClient>,
}

impl Engine {
    /// Engine over the default database location.
    pub fn open() -> anyhow::Result<Self> {
        Self::with_database(Database::open()?)
    }

    /// Engine over `db`, migrating it first.
    pub fn with_database(db: Database) -> anyhow::Result<Self> {
        db.migrate()?;
        let settings = Settings::load(&db);
        let shared = SharedDatabase::new(db);
        let bus = EventBus::new(settings.event_capacity);

        let client: Arc<dyn ReleaseClient> =
            Arc::new(HttpReleaseClient::new(settings.proxy_url.as_deref())?);
        let deps = DependencyManager::for_host(
            Arc::new(shared.clone()),
            Arc::clone(&client),
            bus.clone(),
        )?;

        Self::assemble(shared, settings, bus, Arc::new(deps), client)
    }

    /// Engine with an explicit release client and install location.
    pub fn with_parts(
        db: Database,
        client: Arc<dyn ReleaseClient>,
        cache_dir: PathBuf,
        platform: Platform,
    ) -> anyhow::Result<Self> {
        db.migrate()?;
        let settings = Settings::load(&db);
        let shared = SharedDatabase::new(db);
        let bus = EventBus::new(settings.event_capacity);
        let deps = DependencyManager::new(
            Arc::new(shared.clone()),
            Arc::clone(&client),
            bus.clone(),
            cache_dir,
            platform,
        );

        Self::assemble(shared, settings, bus, Arc::new(deps), client)
    }

    fn assemble(
        db: SharedDatabase,
        settings: Settings,
        bus: EventBus,
        deps: Arc<DependencyManager>,
        client: Arc<dyn ReleaseClient>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(TaskRegistry::load(Arc::new(db.clone()))?);
        let tools: Arc<dyn ToolResolver> = deps.clone();
        let pipeline = Pipeline::new(
            Arc::clone(&registry),
            bus.clone(),
            tools,
            Arc::new(db.clone()),
        )
        .with_options(PipelineOptions::from(&settings));

        info!("Engine ready");
        Ok(Self {
            db,
            settings: Mutex::new(settings),
            bus,
            registry,
            deps,
            pipeline,
            client,
        })
    }

    /// Records the state of every dependency at startup.
    pub async fn initialize(&self) {
        if let Err(e) = self.deps.initialize_defaults().await {
            warn!(error = %e, "Failed to initialize dependency records");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> Settings {
        self.lock_settings().clone()
    }

    /// Cancels running tasks and waits for their workers to exit.
    pub async fn shutdown(&self) {
        self.pipeline.shutdown();
        self.pipeline.wait_idle().await;
        info!("Engine stopped");
    }

    fn lock_settings(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Task Commands
    // ========================================================================

    pub async fn start_download(&self, request: DownloadRequest) -> CommandResponse<TaskHandle> {
        CommandResponse::from_result(
            self.pipeline
                .start_download(request)
                .await
                .map(|task_id| TaskHandle { task_id }),
        )
    }

    pub async fn quick_download(
        &self,
        request: QuickDownloadRequest,
    ) -> CommandResponse<TaskHandle> {
        CommandResponse::from_result(
            self.pipeline
                .quick_download(request)
                .await
                .map(|task_id| TaskHandle { task_id }),
        )
    }

    /// Metadata preview for a URL.
    pub async fn parse_url(&self, url: &str, browser: &str) -> CommandResponse<VideoMetadata> {
        match self.pipeline.parse_url(url, browser).await {
            Ok(metadata) => CommandResponse::ok(metadata.as_ref().clone()),
            Err(e) => CommandResponse::error(format!("{:#}", e)),
        }
    }

    pub async fn list_tasks(&self) -> CommandResponse<Vec<Task>> {
        CommandResponse::ok(self.registry.list().await)
    }

    pub async fn get_task(&self, id: &str) -> CommandResponse<Task> {
        CommandResponse::from_result(self.registry.get(id).await)
    }

    pub async fn find_task_by_url(&self, url: &str) -> CommandResponse<Task> {
        match self.registry.find_by_url(url).await {
            Some(task) => CommandResponse::ok(task),
            None => CommandResponse::error(format!("No task for {}", url)),
        }
    }

    pub async fn delete_task(&self, id: &str) -> CommandResponse<()> {
        CommandResponse::from_result(self.registry.delete(id).await)
    }

    /// Thumbnail image of a task, fetched once and then served from the cache.
    pub async fn task_thumbnail(&self, id: &str) -> CommandResponse<Vec<u8>> {
        match self.thumbnail(id).await {
            Ok(data) => CommandResponse::ok(data),
            Err(e) => CommandResponse::error(format!("{:#}", e)),
        }
    }

    async fn thumbnail(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        let task = self.registry.get(id).await?;
        if task.thumbnail.is_empty() {
            bail!("Task {} has no thumbnail", id);
        }

        let cached = self.db.lock().get_thumbnail(&task.thumbnail)?;
        if let Some(data) = cached {
            return Ok(data);
        }

        let mut body = self
            .client
            .open_stream(&task.thumbnail)
            .await
            .with_context(|| format!("Failed to fetch thumbnail {}", task.thumbnail))?;
        let mut data = Vec::new();
        while let Some(chunk) = body.chunks.next().await {
            data.extend_from_slice(&chunk?);
            if data.len() > MAX_THUMBNAIL_BYTES {
                bail!("Thumbnail exceeds {} bytes", MAX_THUMBNAIL_BYTES);
            }
        }

        self.db.lock().save_thumbnail(&task.thumbnail, &data)?;
        debug!(task_id = %id, bytes = data.len(), "Thumbnail cached");
        Ok(data)
    }

    // ========================================================================
    // Format Commands
    // ========================================================================

    /// Every recode target, including ones that cannot be selected.
    pub fn list_conversion_formats(&self) -> CommandResponse<ConversionFormats> {
        CommandResponse::ok(formats::all_formats())
    }

    /// Recode targets a download request may name.
    pub fn available_conversion_formats(&self) -> CommandResponse<ConversionFormats> {
        CommandResponse::ok(formats::available_formats())
    }

    // ========================================================================
    // Dependency Commands
    // ========================================================================

    pub async fn list_dependencies(&self) -> CommandResponse<Vec<DependencyInfo>> {
        CommandResponse::from_result(self.deps.list().await)
    }

    pub async fn check_dependency(&self, dep_type: DependencyType) -> CommandResponse<DependencyInfo> {
        CommandResponse::from_result(self.deps.check(dep_type).await)
    }

    pub async fn check_dependency_update(
        &self,
        dep_type: DependencyType,
    ) -> CommandResponse<DependencyInfo> {
        CommandResponse::from_result(self.deps.check_update(dep_type).await)
    }

    pub async fn check_updates(&self) -> CommandResponse<Vec<DependencyInfo>> {
        CommandResponse::from_result(self.deps.check_updates().await)
    }

    pub async fn dependencies_ready(&self) -> CommandResponse<bool> {
        CommandResponse::from_result(self.deps.dependencies_ready().await)
    }

    pub async fn validate_dependencies(&self) -> CommandResponse<()> {
        CommandResponse::from_result(self.deps.validate_dependencies().await)
    }

    /// Installs a dependency, using the configured mirror unless one is given.
    pub async fn install_dependency(
        &self,
        dep_type: DependencyType,
        config: DownloadConfig,
    ) -> CommandResponse<DependencyInfo> {
        let config = self.with_preferred_mirror(dep_type, config);
        CommandResponse::from_result(self.deps.install(dep_type, config).await)
    }

    pub async fn update_dependency(
        &self,
        dep_type: DependencyType,
        config: DownloadConfig,
    ) -> CommandResponse<DependencyInfo> {
        let config = self.with_preferred_mirror(dep_type, config);
        CommandResponse::from_result(self.deps.update(dep_type, config).await)
    }

    pub async fn set_dependency_path(
        &self,
        dep_type: DependencyType,
        path: PathBuf,
    ) -> CommandResponse<DependencyInfo> {
        CommandResponse::from_result(self.deps.set_executable_path(dep_type, &path).await)
    }

    fn with_preferred_mirror(
        &self,
        dep_type: DependencyType,
        mut config: DownloadConfig,
    ) -> DownloadConfig {
        if config.mirror.is_none() {
            let settings = self.lock_settings();
            config.mirror = match dep_type {
                DependencyType::YtDlp => settings.ytdlp_mirror.clone(),
                DependencyType::Ffmpeg => settings.ffmpeg_mirror.clone(),
            };
        }
        config
    }

    // ========================================================================
    // Settings Commands
    // ========================================================================

    pub fn get_settings(&self) -> CommandResponse<Settings> {
        CommandResponse::ok(self.settings())
    }

    /// Changes one setting by its dotted key and persists the result.
    ///
    /// Pipeline options apply to tasks started afterwards. The HTTP proxy and
    /// event bus capacity apply after a restart.
    pub fn set_setting(&self, key: &str, value: serde_json::Value) -> CommandResponse<Settings> {
        let mut settings = self.lock_settings();
        let mut updated = settings.clone();
        if let Err(e) = updated.set_value(key, &value) {
            return CommandResponse::error(e.to_string());
        }
        if let Err(e) = updated.save(&self.db.lock()) {
            return CommandResponse::error(format!("Failed to save settings: {:#}", e));
        }

        self.pipeline.configure(PipelineOptions::from(&updated));
        *settings = updated.clone();
        info!(key = %key, "Setting updated");
        CommandResponse::ok(updated)
    }
}
