//! Dependency lifecycle manager.
//!
//! The `DependencyManager` coordinates the providers, the mirror catalog, the
//! downloader and the preference store. Every check, install and update
//! persists the resulting record so state survives restarts.

use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::catalog;
use super::client::ReleaseClient;
use super::downloader;
use super::extractor::{extract_binary, is_executable, make_executable, relocate};
use super::paths;
use super::providers::{provider_for, DependencyProvider};
use super::types::{
    ArchiveFormat, DependencyError, DependencyInfo, DependencyProgress, DependencyStage,
    DependencyType, DownloadConfig, Platform,
};
use super::version;
use crate::config::PreferenceStore;
use crate::events::{EventBus, EventPayload};

type Result<T> = std::result::Result<T, DependencyError>;

/// Resolves executables for the pipeline.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    /// Path of a verified, executable binary.
    async fn executable(&self, dep_type: DependencyType) -> Result<PathBuf>;
}

/// A provider plus the lock serializing its record updates.
struct Slot {
    provider: Box<dyn DependencyProvider>,
    lock: Mutex<()>,
}

// ============================================================================
// Dependency Manager
// ============================================================================

/// Checks, installs and updates external executables.
///
/// Thread-safe; share it behind an `Arc`.
pub struct DependencyManager {
    store: Arc<dyn PreferenceStore>,
    client: Arc<dyn ReleaseClient>,
    bus: EventBus,
    /// Base directory for managed installs.
    cache_dir: PathBuf,
    platform: Platform,
    slots: HashMap<DependencyType, Slot>,
}

impl DependencyManager {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        client: Arc<dyn ReleaseClient>,
        bus: EventBus,
        cache_dir: PathBuf,
        platform: Platform,
    ) -> Self {
        let slots = DependencyType::all()
            .iter()
            .map(|dep_type| {
                let slot = Slot {
                    provider: provider_for(*dep_type, platform),
                    lock: Mutex::new(()),
                };
                (*dep_type, slot)
            })
            .collect();

        info!(
            "DependencyManager initialized. Cache dir: {}, Platform: {}",
            cache_dir.display(),
            platform
        );

        Self {
            store,
            client,
            bus,
            cache_dir,
            platform,
            slots,
        }
    }

    /// Manager for the running host, installing under the user cache dir.
    pub fn for_host(
        store: Arc<dyn PreferenceStore>,
        client: Arc<dyn ReleaseClient>,
        bus: EventBus,
    ) -> Result<Self> {
        let platform = Platform::detect().ok_or_else(|| {
            DependencyError::UnsupportedPlatform(format!(
                "{}/{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ))
        })?;
        Ok(Self::new(store, client, bus, paths::get_cache_dir(), platform))
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Directory managed installs of `dep_type` go to.
    pub fn install_dir(&self, dep_type: DependencyType) -> PathBuf {
        self.cache_dir.join(dep_type.as_str())
    }

    /// Mirrors available for `dep_type` on this platform.
    pub fn mirrors(&self, dep_type: DependencyType) -> Vec<catalog::Mirror> {
        catalog::mirrors(dep_type, self.platform)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current record, probing the host when none points at a binary.
    pub async fn check(&self, dep_type: DependencyType) -> Result<DependencyInfo> {
        let slot = self.slot(dep_type)?;
        let _guard = slot.lock.lock().await;
        self.check_locked(slot)
    }

    /// Refreshes `latest_version` and `need_update` from the release feed.
    pub async fn check_update(&self, dep_type: DependencyType) -> Result<DependencyInfo> {
        let slot = self.slot(dep_type)?;
        let _guard = slot.lock.lock().await;
        let mirror = catalog::recommended_mirror(dep_type, self.platform);
        self.check_update_locked(slot, mirror).await
    }

    /// Records for every dependency.
    pub async fn list(&self) -> Result<Vec<DependencyInfo>> {
        let mut infos = Vec::with_capacity(DependencyType::all().len());
        for dep_type in DependencyType::all() {
            infos.push(self.check(*dep_type).await?);
        }
        Ok(infos)
    }

    /// Update checks for every dependency.
    ///
    /// A failed remote check is logged and the stored record returned in its
    /// place.
    pub async fn check_updates(&self) -> Result<Vec<DependencyInfo>> {
        let mut infos = Vec::with_capacity(DependencyType::all().len());
        for dep_type in DependencyType::all() {
            match self.check_update(*dep_type).await {
                Ok(info) => infos.push(info),
                Err(e) => {
                    warn!(dependency = %dep_type, error = %e, "Update check failed");
                    infos.push(self.check(*dep_type).await?);
                }
            }
        }
        Ok(infos)
    }

    /// Whether every dependency is available.
    pub async fn dependencies_ready(&self) -> Result<bool> {
        for dep_type in DependencyType::all() {
            if !self.check(*dep_type).await?.available {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fails with the first dependency that isn't available.
    pub async fn validate_dependencies(&self) -> Result<()> {
        for dep_type in DependencyType::all() {
            let info = self.check(*dep_type).await?;
            if !info.available {
                return Err(DependencyError::NotInstalled(*dep_type));
            }
        }
        Ok(())
    }

    /// Writes an initial record for every dependency that has none.
    pub async fn initialize_defaults(&self) -> Result<()> {
        for dep_type in DependencyType::all() {
            let slot = self.slot(*dep_type)?;
            let _guard = slot.lock.lock().await;
            if self.store.dependency_record(*dep_type)?.is_none() {
                let info = self.check_locked(slot)?;
                debug!(
                    dependency = %dep_type,
                    available = info.available,
                    "Initialized dependency record"
                );
            }
        }
        Ok(())
    }

    /// Verified executable for `dep_type`.
    pub async fn executable(&self, dep_type: DependencyType) -> Result<PathBuf> {
        let info = self.check(dep_type).await?;
        match info.exec_path {
            Some(path) if info.available => Ok(path),
            _ => Err(DependencyError::NotInstalled(dep_type)),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Installs `dep_type`, resolving the latest release unless pinned.
    pub async fn install(
        &self,
        dep_type: DependencyType,
        config: DownloadConfig,
    ) -> Result<DependencyInfo> {
        let slot = self.slot(dep_type)?;
        let _guard = slot.lock.lock().await;
        self.install_locked(slot, &config, DependencyStage::Installing)
            .await
    }

    /// Installs the latest release if it is newer than the installed one.
    pub async fn update(
        &self,
        dep_type: DependencyType,
        config: DownloadConfig,
    ) -> Result<DependencyInfo> {
        let slot = self.slot(dep_type)?;
        let _guard = slot.lock.lock().await;

        let mirror = self.mirror_for(dep_type, &config);
        let info = self.check_update_locked(slot, &mirror).await?;
        if !info.need_update || info.latest_version.is_empty() {
            return Err(DependencyError::AlreadyUpToDate(dep_type));
        }

        let pinned = DownloadConfig {
            version: Some(info.latest_version),
            mirror: Some(mirror),
        };
        self.install_locked(slot, &pinned, DependencyStage::Updating)
            .await
    }

    /// Points `dep_type` at a user-chosen binary (or a directory holding it).
    pub async fn set_executable_path(
        &self,
        dep_type: DependencyType,
        path: &Path,
    ) -> Result<DependencyInfo> {
        let slot = self.slot(dep_type)?;
        let _guard = slot.lock.lock().await;

        let exec_path = if path.is_dir() {
            path.join(paths::executable_name(
                slot.provider.binary_stem(),
                self.platform,
            ))
        } else {
            path.to_path_buf()
        };

        if !is_executable(&exec_path) {
            return Err(DependencyError::NotExecutable(exec_path));
        }

        let mut info = self.load_record(dep_type)?;
        info.path = paths::parent_dir(&exec_path);
        info.exec_path = Some(exec_path);
        info.available = true;
        self.store.set_dependency_record(dep_type, &info)?;

        info!(
            dependency = %dep_type,
            path = ?info.exec_path,
            "Executable path set manually"
        );
        Ok(info)
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    fn slot(&self, dep_type: DependencyType) -> Result<&Slot> {
        self.slots
            .get(&dep_type)
            .ok_or(DependencyError::NoProvider(dep_type))
    }

    fn mirror_for(&self, dep_type: DependencyType, config: &DownloadConfig) -> String {
        config
            .mirror
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| catalog::recommended_mirror(dep_type, self.platform))
            .to_string()
    }

    fn load_record(&self, dep_type: DependencyType) -> Result<DependencyInfo> {
        let mut info = self
            .store
            .dependency_record(dep_type)?
            .unwrap_or_else(|| DependencyInfo::new(dep_type));
        info.dep_type = dep_type;
        Ok(info)
    }

    fn publish_progress(&self, dep_type: DependencyType, stage: DependencyStage, percentage: f64) {
        self.bus
            .publish(EventPayload::DependencyProgress(DependencyProgress {
                dep_type,
                stage,
                percentage,
            }));
    }

    fn check_locked(&self, slot: &Slot) -> Result<DependencyInfo> {
        let dep_type = slot.provider.dep_type();
        let mut info = self.load_record(dep_type)?;

        let recorded_ok = info.exec_path.as_deref().is_some_and(is_executable);
        if !recorded_ok {
            if let Some(found) = slot.provider.probe(&self.install_dir(dep_type)) {
                debug!(
                    dependency = %dep_type,
                    path = %found.exec_path.display(),
                    "Found existing binary"
                );
                info.path = paths::parent_dir(&found.exec_path);
                info.exec_path = Some(found.exec_path);
                if let Some(version) = found.version {
                    info.version = version;
                }
            }
        }

        info.available = info.exec_path.as_deref().is_some_and(is_executable);
        self.store.set_dependency_record(dep_type, &info)?;

        debug!(
            dependency = %dep_type,
            available = info.available,
            version = %info.version,
            "Dependency checked"
        );
        Ok(info)
    }

    async fn check_update_locked(&self, slot: &Slot, mirror: &str) -> Result<DependencyInfo> {
        let dep_type = slot.provider.dep_type();
        let (api, feed) = catalog::release_api(dep_type, mirror, self.platform)?;

        let body = self
            .client
            .fetch_text(api)
            .await
            .map_err(DependencyError::Network)?;
        let latest = feed.parse_latest(&body).map_err(DependencyError::Network)?;

        let mut info = self.load_record(dep_type)?;
        info.need_update = version::needs_update(&info.version, &latest);
        info.latest_version = latest;
        self.store.set_dependency_record(dep_type, &info)?;

        info!(
            dependency = %dep_type,
            installed = %info.version,
            latest = %info.latest_version,
            need_update = info.need_update,
            "Update check complete"
        );
        Ok(info)
    }

    async fn install_locked(
        &self,
        slot: &Slot,
        config: &DownloadConfig,
        stage: DependencyStage,
    ) -> Result<DependencyInfo> {
        let provider = slot.provider.as_ref();
        let dep_type = provider.dep_type();
        let mirror = self.mirror_for(dep_type, config);

        let version = match config.pinned_version() {
            Some(version) => version.to_string(),
            None => {
                let info = self.check_update_locked(slot, &mirror).await?;
                if info.latest_version.is_empty() {
                    return Err(DependencyError::NoLatestVersion(dep_type));
                }
                info.latest_version
            }
        };

        let url = catalog::download_url(dep_type, &mirror, &version, self.platform)?;
        let install_dir = self.install_dir(dep_type);
        let dest = provider.managed_exec_path(&install_dir, &version);

        info!(
            dependency = %dep_type,
            version = %version,
            url = %url,
            dest = %dest.display(),
            "Installing dependency"
        );
        self.publish_progress(dep_type, stage, 0.0);

        let staged = self.fetch(provider, &url, &install_dir, stage).await?;
        relocate(staged, &dest).map_err(DependencyError::Install)?;

        let mut info = self.load_record(dep_type)?;
        let previous = info.exec_path.take();

        info.path = Some(install_dir.clone());
        info.exec_path = Some(dest.clone());
        info.version = version.clone();
        info.latest_version = version;
        info.need_update = false;
        info.available = true;
        self.store.set_dependency_record(dep_type, &info)?;

        if let Some(previous) = previous {
            discard_previous(&install_dir, &previous, &dest);
        }

        self.publish_progress(dep_type, stage.finished(), 100.0);
        info!(
            dependency = %dep_type,
            path = %dest.display(),
            "Dependency installed"
        );
        Ok(info)
    }

    /// Downloads `url` into a staging file inside `install_dir`, extracting
    /// the binary when the release is archived.
    ///
    /// The returned file is executable and still temporary; it is deleted if
    /// dropped without being relocated.
    async fn fetch(
        &self,
        provider: &dyn DependencyProvider,
        url: &str,
        install_dir: &Path,
        stage: DependencyStage,
    ) -> Result<TempPath> {
        let dep_type = provider.dep_type();

        tokio::fs::create_dir_all(install_dir)
            .await
            .with_context(|| format!("Failed to create {}", install_dir.display()))
            .map_err(DependencyError::Install)?;

        let (file, download_path) = NamedTempFile::new_in(install_dir)
            .context("Failed to create staging file")
            .map_err(DependencyError::Install)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        downloader::download_to(self.client.as_ref(), url, &mut file, |percent| {
            self.publish_progress(dep_type, stage, f64::from(percent))
        })
        .await
        .map_err(DependencyError::Network)?;
        drop(file);

        let staged = match ArchiveFormat::from_url(url) {
            ArchiveFormat::Raw => download_path,
            format => {
                let member = provider.archive_member();
                let dir = install_dir.to_path_buf();
                let extracted = tokio::task::spawn_blocking(move || -> anyhow::Result<TempPath> {
                    let mut out =
                        NamedTempFile::new_in(&dir).context("Failed to create staging file")?;
                    extract_binary(&download_path, format, &member, out.as_file_mut())?;
                    Ok(out.into_temp_path())
                })
                .await
                .context("Extraction task failed");
                extracted
                    .and_then(|result| result)
                    .map_err(DependencyError::Install)?
            }
        };

        make_executable(&staged).map_err(DependencyError::Install)?;
        Ok(staged)
    }
}

/// Removes a superseded managed binary. System binaries are left alone.
fn discard_previous(install_dir: &Path, previous: &Path, current: &Path) {
    if previous == current || !previous.starts_with(install_dir) {
        return;
    }

    // ffmpeg installs own a version directory
    let result = match previous.parent() {
        Some(parent) if parent != install_dir && parent.starts_with(install_dir) => {
            std::fs::remove_dir_all(parent)
        }
        _ => std::fs::remove_file(previous),
    };

    if let Err(e) = result {
        warn!(
            path = %previous.display(),
            error = %e,
            "Failed to remove previous install"
        );
    }
}

#[async_trait]
impl ToolResolver for DependencyManager {
    async fn executable(&self, dep_type: DependencyType) -> Result<PathBuf> {
        DependencyManager::executable(self, dep_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SharedDatabase};
    use crate::deps::client::fake::{FakeBody, FakeReleaseClient};
    use crate::deps::providers::YtDlpProvider;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    const OLD: &str = "2024.03.10";
    const NEW: &str = "2024.12.06";

    struct Fixture {
        _temp: TempDir,
        cache_dir: PathBuf,
        store: SharedDatabase,
        bus: EventBus,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let db = Database::open_at(temp.path().join("test.db")).unwrap();
            db.migrate().unwrap();
            Self {
                cache_dir: temp.path().join("cache"),
                store: SharedDatabase::new(db),
                bus: EventBus::new(512),
                _temp: temp,
            }
        }

        fn manager(&self, client: FakeReleaseClient, platform: Platform) -> DependencyManager {
            DependencyManager::new(
                Arc::new(self.store.clone()),
                Arc::new(client),
                self.bus.clone(),
                self.cache_dir.clone(),
                platform,
            )
        }

        fn seed(&self, info: &DependencyInfo) {
            self.store
                .set_dependency_record(info.dep_type, info)
                .unwrap();
        }

        fn record(&self, dep_type: DependencyType) -> DependencyInfo {
            self.store.dependency_record(dep_type).unwrap().unwrap()
        }
    }

    fn host() -> Platform {
        Platform::detect().unwrap_or(Platform::LinuxX64)
    }

    fn ytdlp_url(version: &str, platform: Platform) -> String {
        catalog::download_url(DependencyType::YtDlp, "github", version, platform).unwrap()
    }

    fn release(tag: &str) -> String {
        format!(r#"{{"tag_name":"{}"}}"#, tag)
    }

    fn drain(rx: &mut broadcast::Receiver<crate::events::BusEvent>) -> Vec<DependencyProgress> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EventPayload::DependencyProgress(progress) = event.payload {
                out.push(progress);
            }
        }
        out
    }

    // ------------------------------------------------------------------------
    // check
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_check_missing_dependency_persists_unavailable() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeReleaseClient::default(), Platform::MacosArm64);

        let info = manager.check(DependencyType::Ffmpeg).await.unwrap();
        assert!(!info.available);
        assert!(info.exec_path.is_none());
        assert_eq!(fx.record(DependencyType::Ffmpeg), info);

        assert!(matches!(
            manager.executable(DependencyType::Ffmpeg).await,
            Err(DependencyError::NotInstalled(DependencyType::Ffmpeg))
        ));
        assert!(!manager.dependencies_ready().await.unwrap());
    }

    #[tokio::test]
    async fn test_check_finds_managed_install() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeReleaseClient::default(), host());

        let exec = YtDlpProvider::new(host())
            .managed_exec_path(&manager.install_dir(DependencyType::YtDlp), OLD);
        std::fs::create_dir_all(exec.parent().unwrap()).unwrap();
        std::fs::write(&exec, b"bin").unwrap();
        make_executable(&exec).unwrap();

        let info = manager.check(DependencyType::YtDlp).await.unwrap();
        assert!(info.available);
        assert_eq!(info.exec_path.as_deref(), Some(exec.as_path()));
        assert_eq!(info.version, OLD);
    }

    // ------------------------------------------------------------------------
    // check_update
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_check_update_empty_version_needs_update() {
        let fx = Fixture::new();
        let client = FakeReleaseClient::default().with_text(catalog::YTDLP_RELEASE_API, &release(NEW));
        let manager = fx.manager(client, host());

        let info = manager.check_update(DependencyType::YtDlp).await.unwrap();
        assert!(info.need_update);
        assert_eq!(info.latest_version, NEW);
        assert!(fx.record(DependencyType::YtDlp).need_update);
    }

    #[tokio::test]
    async fn test_check_update_equal_version_is_current() {
        let fx = Fixture::new();
        fx.seed(&DependencyInfo {
            version: NEW.into(),
            ..DependencyInfo::new(DependencyType::YtDlp)
        });
        let client = FakeReleaseClient::default().with_text(catalog::YTDLP_RELEASE_API, &release(NEW));
        let manager = fx.manager(client, host());

        let info = manager.check_update(DependencyType::YtDlp).await.unwrap();
        assert!(!info.need_update);
    }

    #[tokio::test]
    async fn test_check_update_empty_tag_never_flags() {
        let fx = Fixture::new();
        fx.seed(&DependencyInfo {
            version: OLD.into(),
            ..DependencyInfo::new(DependencyType::YtDlp)
        });
        let client = FakeReleaseClient::default().with_text(catalog::YTDLP_RELEASE_API, "{}");
        let manager = fx.manager(client, host());

        let info = manager.check_update(DependencyType::YtDlp).await.unwrap();
        assert!(!info.need_update);
        assert_eq!(info.latest_version, "");
    }

    #[tokio::test]
    async fn test_check_update_network_error() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeReleaseClient::default(), host());

        assert!(matches!(
            manager.check_update(DependencyType::YtDlp).await,
            Err(DependencyError::Network(_))
        ));
    }

    // ------------------------------------------------------------------------
    // install / update
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_install_pinned_version() {
        let fx = Fixture::new();
        let platform = host();
        let client = FakeReleaseClient::default()
            .with_body(&ytdlp_url(OLD, platform), FakeBody::sized(4096, 64));
        let manager = fx.manager(client, platform);
        let mut rx = fx.bus.subscribe();

        let config = DownloadConfig {
            version: Some(OLD.into()),
            mirror: Some("github".into()),
        };
        let info = manager.install(DependencyType::YtDlp, config).await.unwrap();

        let exec = info.exec_path.clone().unwrap();
        assert!(is_executable(&exec));
        assert_eq!(std::fs::metadata(&exec).unwrap().len(), 4096);
        assert_eq!(info.version, OLD);
        assert_eq!(info.latest_version, OLD);
        assert!(info.available);
        assert!(!info.need_update);
        assert_eq!(fx.record(DependencyType::YtDlp), info);

        // Only the installed binary remains in the install dir
        let entries = std::fs::read_dir(manager.install_dir(DependencyType::YtDlp))
            .unwrap()
            .count();
        assert_eq!(entries, 1);

        let events = drain(&mut rx);
        assert_eq!(events.first().unwrap().stage, DependencyStage::Installing);
        assert_eq!(events.first().unwrap().percentage, 0.0);
        let last = events.last().unwrap();
        assert_eq!(last.stage, DependencyStage::Installed);
        assert_eq!(last.percentage, 100.0);
        assert!(events.len() <= 102);
        assert!(events
            .windows(2)
            .all(|w| w[0].percentage <= w[1].percentage));
    }

    #[tokio::test]
    async fn test_install_latest_resolves_release() {
        let fx = Fixture::new();
        let platform = host();
        let client = FakeReleaseClient::default()
            .with_text(catalog::YTDLP_RELEASE_API, &release(NEW))
            .with_body(&ytdlp_url(NEW, platform), FakeBody::sized(100, 10));
        let manager = fx.manager(client, platform);

        let info = manager
            .install(DependencyType::YtDlp, DownloadConfig::mirror("github"))
            .await
            .unwrap();
        assert_eq!(info.version, NEW);
        assert!(info.exec_path.unwrap().to_string_lossy().contains(NEW));
    }

    #[tokio::test]
    async fn test_interrupted_install_leaves_no_artifact() {
        let fx = Fixture::new();
        let platform = host();
        let seeded = DependencyInfo {
            version: OLD.into(),
            exec_path: Some(PathBuf::from("/opt/yt-dlp")),
            available: true,
            ..DependencyInfo::new(DependencyType::YtDlp)
        };
        fx.seed(&seeded);

        let body = FakeBody {
            fail_after: Some(5),
            ..FakeBody::sized(4096, 16)
        };
        let client = FakeReleaseClient::default().with_body(&ytdlp_url(NEW, platform), body);
        let manager = fx.manager(client, platform);

        let config = DownloadConfig {
            version: Some(NEW.into()),
            mirror: Some("github".into()),
        };
        let err = manager
            .install(DependencyType::YtDlp, config)
            .await
            .unwrap_err();
        assert!(matches!(err, DependencyError::Network(_)));

        let install_dir = manager.install_dir(DependencyType::YtDlp);
        let target = YtDlpProvider::new(platform).managed_exec_path(&install_dir, NEW);
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(&install_dir).unwrap().count(), 0);

        let record = fx.record(DependencyType::YtDlp);
        assert_eq!(record.available, seeded.available);
        assert_eq!(record, seeded);
    }

    #[tokio::test]
    async fn test_install_unsupported_mirror() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeReleaseClient::default(), Platform::LinuxX64);

        let config = DownloadConfig {
            version: Some("7.1".into()),
            mirror: Some("evermeet".into()),
        };
        let err = manager
            .install(DependencyType::Ffmpeg, config)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported mirror: evermeet");
    }

    #[tokio::test]
    async fn test_install_archived_ffmpeg() {
        let fx = Fixture::new();
        let platform = Platform::WindowsX64;

        let mut archive = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut archive));
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("ffmpeg-master/bin/ffprobe.exe", options).unwrap();
            zip.write_all(b"probe").unwrap();
            zip.start_file("ffmpeg-master/bin/ffmpeg.exe", options).unwrap();
            zip.write_all(b"muxer").unwrap();
            zip.finish().unwrap();
        }
        let len = archive.len() as u64;

        const TAG: &str = "autobuild-2025-01-15";
        let url = catalog::download_url(DependencyType::Ffmpeg, "github", TAG, platform).unwrap();
        let body = FakeBody {
            chunks: vec![archive],
            total: Some(len),
            fail_after: None,
        };
        let client = FakeReleaseClient::default().with_body(&url, body);
        let manager = fx.manager(client, platform);

        let config = DownloadConfig {
            version: Some(TAG.into()),
            mirror: Some("github".into()),
        };
        let info = manager
            .install(DependencyType::Ffmpeg, config)
            .await
            .unwrap();

        let exec = info.exec_path.unwrap();
        assert!(exec.ends_with(Path::new(TAG).join("ffmpeg.exe")));
        assert_eq!(std::fs::read(&exec).unwrap(), b"muxer");

        // Archive and extraction staging files are gone
        let install_dir = manager.install_dir(DependencyType::Ffmpeg);
        let names: Vec<_> = std::fs::read_dir(&install_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(TAG)]);
    }

    #[tokio::test]
    async fn test_update_already_current() {
        let fx = Fixture::new();
        fx.seed(&DependencyInfo {
            version: NEW.into(),
            ..DependencyInfo::new(DependencyType::YtDlp)
        });
        let client = FakeReleaseClient::default().with_text(catalog::YTDLP_RELEASE_API, &release(NEW));
        let manager = fx.manager(client, host());

        assert!(matches!(
            manager
                .update(DependencyType::YtDlp, DownloadConfig::default())
                .await,
            Err(DependencyError::AlreadyUpToDate(DependencyType::YtDlp))
        ));
    }

    #[tokio::test]
    async fn test_update_replaces_previous_install() {
        let fx = Fixture::new();
        let platform = host();
        let client = FakeReleaseClient::default()
            .with_text(catalog::YTDLP_RELEASE_API, &release(NEW))
            .with_body(&ytdlp_url(OLD, platform), FakeBody::sized(64, 4))
            .with_body(&ytdlp_url(NEW, platform), FakeBody::sized(128, 4));
        let manager = fx.manager(client, platform);
        let mut rx = fx.bus.subscribe();

        let old = manager
            .install(
                DependencyType::YtDlp,
                DownloadConfig {
                    version: Some(OLD.into()),
                    mirror: Some("github".into()),
                },
            )
            .await
            .unwrap();
        drain(&mut rx);

        let new = manager
            .update(DependencyType::YtDlp, DownloadConfig::mirror("github"))
            .await
            .unwrap();

        assert_eq!(new.version, NEW);
        assert!(!old.exec_path.unwrap().exists());
        assert!(new.exec_path.unwrap().exists());

        let events = drain(&mut rx);
        assert_eq!(events.first().unwrap().stage, DependencyStage::Updating);
        assert_eq!(events.last().unwrap().stage, DependencyStage::Updated);
    }

    // ------------------------------------------------------------------------
    // set_executable_path
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_set_executable_path() {
        let fx = Fixture::new();
        let platform = host();
        let manager = fx.manager(FakeReleaseClient::default(), platform);

        let dir = fx.cache_dir.join("custom");
        std::fs::create_dir_all(&dir).unwrap();
        let binary = dir.join(paths::executable_name("ffmpeg", platform));
        std::fs::write(&binary, b"bin").unwrap();

        #[cfg(unix)]
        assert!(matches!(
            manager.set_executable_path(DependencyType::Ffmpeg, &binary).await,
            Err(DependencyError::NotExecutable(_))
        ));

        make_executable(&binary).unwrap();
        let info = manager
            .set_executable_path(DependencyType::Ffmpeg, &dir)
            .await
            .unwrap();
        assert!(info.available);
        assert_eq!(info.exec_path.as_deref(), Some(binary.as_path()));
        assert_eq!(info.path.as_deref(), Some(dir.as_path()));
        assert_eq!(
            manager.executable(DependencyType::Ffmpeg).await.unwrap(),
            binary
        );
    }

    #[test]
    fn test_discard_previous_keeps_foreign_binaries() {
        let temp = TempDir::new().unwrap();
        let install_dir = temp.path().join("ffmpeg");
        let old = install_dir.join("6.0").join("ffmpeg");
        let new = install_dir.join("7.1").join("ffmpeg");
        let foreign = temp.path().join("usr-bin-ffmpeg");
        for path in [&old, &new, &foreign] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"bin").unwrap();
        }

        discard_previous(&install_dir, &foreign, &new);
        assert!(foreign.exists());

        discard_previous(&install_dir, &old, &new);
        assert!(!install_dir.join("6.0").exists());
        assert!(new.exists());
    }
}
