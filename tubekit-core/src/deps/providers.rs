//! Per-dependency knowledge: install layout, archive contents and probing.
//!
//! Managed installs are versioned so an update never overwrites a binary a
//! running task may still be executing:
//!
//! - yt-dlp: `<cache>/ytdlp/yt-dlp.<version>[.exe]`
//! - ffmpeg: `<cache>/ffmpeg/<version>/ffmpeg[.exe]`

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::extractor::is_executable;
use super::paths::{executable_name, find_on_path, scan_path};
use super::types::{DependencyType, Platform};
use super::version::Version;

/// A binary found on the host without a stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub exec_path: PathBuf,
    /// Known only for managed installs, where it is encoded in the path.
    pub version: Option<String>,
}

/// Knows where one dependency lives and how to recognize it.
pub trait DependencyProvider: Send + Sync {
    fn dep_type(&self) -> DependencyType;

    /// Binary name without platform extension.
    fn binary_stem(&self) -> &'static str;

    /// Entry to pull out of an archived release.
    fn archive_member(&self) -> String;

    /// Final location of a managed install of `version`.
    fn managed_exec_path(&self, install_dir: &Path, version: &str) -> PathBuf;

    /// Looks for an existing binary, managed installs first.
    fn probe(&self, install_dir: &Path) -> Option<Probe>;
}

/// Picks the highest version among `(path, version)` candidates.
///
/// Tags that don't parse (rolling builds) rank below numeric ones.
fn newest(candidates: impl Iterator<Item = (PathBuf, String)>) -> Option<Probe> {
    candidates
        .max_by_key(|(_, version)| Version::parse(version).ok())
        .map(|(exec_path, version)| Probe {
            exec_path,
            version: Some(version),
        })
}

fn read_dir_entries(dir: &Path) -> Vec<fs::DirEntry> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(Result::ok).collect(),
        Err(_) => Vec::new(),
    }
}

// ============================================================================
// yt-dlp
// ============================================================================

pub struct YtDlpProvider {
    platform: Platform,
}

impl YtDlpProvider {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Version encoded in a managed file name (`yt-dlp.2024.03.10.exe`).
    fn version_from_name(&self, file_name: &str) -> Option<String> {
        let rest = file_name.strip_prefix("yt-dlp.")?;
        let rest = if self.platform.is_windows() {
            rest.strip_suffix(".exe")?
        } else {
            rest
        };
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

impl DependencyProvider for YtDlpProvider {
    fn dep_type(&self) -> DependencyType {
        DependencyType::YtDlp
    }

    fn binary_stem(&self) -> &'static str {
        "yt-dlp"
    }

    fn archive_member(&self) -> String {
        executable_name(self.binary_stem(), self.platform)
    }

    fn managed_exec_path(&self, install_dir: &Path, version: &str) -> PathBuf {
        install_dir.join(executable_name(&format!("yt-dlp.{}", version), self.platform))
    }

    fn probe(&self, install_dir: &Path) -> Option<Probe> {
        let managed = newest(read_dir_entries(install_dir).into_iter().filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let version = self.version_from_name(&name)?;
            let path = entry.path();
            is_executable(&path).then_some((path, version))
        }));
        if managed.is_some() {
            return managed;
        }

        debug!("No managed yt-dlp in {}, checking PATH", install_dir.display());
        let system = if self.platform.is_windows() {
            scan_path(&executable_name(self.binary_stem(), self.platform))
        } else {
            find_on_path(self.binary_stem())
        };
        system.map(|exec_path| Probe {
            exec_path,
            version: None,
        })
    }
}

// ============================================================================
// ffmpeg
// ============================================================================

pub struct FfmpegProvider {
    platform: Platform,
}

impl FfmpegProvider {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

impl DependencyProvider for FfmpegProvider {
    fn dep_type(&self) -> DependencyType {
        DependencyType::Ffmpeg
    }

    fn binary_stem(&self) -> &'static str {
        "ffmpeg"
    }

    fn archive_member(&self) -> String {
        executable_name(self.binary_stem(), self.platform)
    }

    fn managed_exec_path(&self, install_dir: &Path, version: &str) -> PathBuf {
        install_dir
            .join(version)
            .join(executable_name(self.binary_stem(), self.platform))
    }

    fn probe(&self, install_dir: &Path) -> Option<Probe> {
        let managed = newest(read_dir_entries(install_dir).into_iter().filter_map(|entry| {
            let version = entry.file_name().into_string().ok()?;
            let path = self.managed_exec_path(install_dir, &version);
            is_executable(&path).then_some((path, version))
        }));
        if managed.is_some() {
            return managed;
        }

        // Sandboxed macOS builds can't see the login PATH; users point at a
        // binary explicitly instead.
        let system = match self.platform.os() {
            "windows" => scan_path(&executable_name(self.binary_stem(), self.platform)),
            "darwin" => None,
            _ => find_on_path(self.binary_stem()),
        };
        system.map(|exec_path| Probe {
            exec_path,
            version: None,
        })
    }
}

/// Provider for `dep_type` on `platform`.
pub fn provider_for(dep_type: DependencyType, platform: Platform) -> Box<dyn DependencyProvider> {
    match dep_type {
        DependencyType::YtDlp => Box::new(YtDlpProvider::new(platform)),
        DependencyType::Ffmpeg => Box::new(FfmpegProvider::new(platform)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::extractor::make_executable;
    use tempfile::TempDir;

    fn host() -> Platform {
        Platform::detect().unwrap_or(Platform::LinuxX64)
    }

    fn plant(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"bin").unwrap();
        make_executable(path).unwrap();
    }

    #[test]
    fn test_ytdlp_layout() {
        let provider = YtDlpProvider::new(Platform::WindowsX64);
        let path = provider.managed_exec_path(Path::new("cache"), "2024.03.10");
        assert_eq!(path, Path::new("cache").join("yt-dlp.2024.03.10.exe"));
        assert_eq!(
            provider.version_from_name("yt-dlp.2024.03.10.exe").as_deref(),
            Some("2024.03.10")
        );
        assert_eq!(provider.version_from_name("yt-dlp.exe"), None);
        assert_eq!(provider.archive_member(), "yt-dlp.exe");
    }

    #[test]
    fn test_ffmpeg_layout() {
        let provider = FfmpegProvider::new(Platform::LinuxX64);
        assert_eq!(
            provider.managed_exec_path(Path::new("cache"), "7.1"),
            Path::new("cache").join("7.1").join("ffmpeg")
        );
        assert_eq!(provider.archive_member(), "ffmpeg");
    }

    #[test]
    fn test_ytdlp_probe_prefers_newest_managed() {
        let dir = TempDir::new().unwrap();
        let provider = YtDlpProvider::new(host());

        plant(&provider.managed_exec_path(dir.path(), "2024.03.10"));
        plant(&provider.managed_exec_path(dir.path(), "2024.12.06"));
        fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();

        let probe = provider.probe(dir.path()).unwrap();
        assert_eq!(probe.version.as_deref(), Some("2024.12.06"));
        assert_eq!(
            probe.exec_path,
            provider.managed_exec_path(dir.path(), "2024.12.06")
        );
    }

    #[test]
    fn test_ffmpeg_probe_finds_managed_install() {
        let dir = TempDir::new().unwrap();
        let provider = FfmpegProvider::new(host());

        plant(&provider.managed_exec_path(dir.path(), "7.1"));
        // Version directory without a binary is ignored
        fs::create_dir_all(dir.path().join("8.0")).unwrap();

        let probe = provider.probe(dir.path()).unwrap();
        assert_eq!(probe.version.as_deref(), Some("7.1"));
    }

    #[test]
    fn test_ffmpeg_probe_on_macos_requires_explicit_path() {
        let dir = TempDir::new().unwrap();
        let provider = FfmpegProvider::new(Platform::MacosArm64);
        assert!(provider.probe(dir.path()).is_none());
    }

    #[test]
    fn test_newest_ranks_rolling_tags_last() {
        let picked = newest(
            vec![
                (PathBuf::from("a"), "latest".to_string()),
                (PathBuf::from("b"), "6.0".to_string()),
            ]
            .into_iter(),
        )
        .unwrap();
        assert_eq!(picked.version.as_deref(), Some("6.0"));
    }

    #[test]
    fn test_provider_for() {
        for dep in DependencyType::all() {
            assert_eq!(provider_for(*dep, host()).dep_type(), *dep);
        }
    }
}
