//! Core types for dependency management.
//!
//! Dependency identifiers, platform detection, persisted install records and
//! progress notifications.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::version::VersionError;
use crate::config::SettingsError;

// ============================================================================
// Dependency Identifiers
// ============================================================================

/// External executables the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    /// yt-dlp, the media extractor.
    #[default]
    #[serde(rename = "ytdlp")]
    YtDlp,
    /// ffmpeg, the muxer.
    Ffmpeg,
}

impl DependencyType {
    pub fn all() -> &'static [DependencyType] {
        &[Self::YtDlp, Self::Ffmpeg]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YtDlp => "ytdlp",
            Self::Ffmpeg => "ffmpeg",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ytdlp" | "yt-dlp" => Ok(Self::YtDlp),
            "ffmpeg" => Ok(Self::Ffmpeg),
            _ => Err(format!("Unknown dependency: {}", s)),
        }
    }
}

// ============================================================================
// Platform Detection
// ============================================================================

/// Represents a supported platform (OS + architecture).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    LinuxX64,
    LinuxArm64,
    MacosX64,
    MacosArm64,
    WindowsX64,
    WindowsArm64,
}

impl Platform {
    /// Detects the current platform at runtime.
    ///
    /// Returns `None` if the platform is unsupported.
    pub fn detect() -> Option<Self> {
        match (std::env::consts::OS, std::env::consts::ARCH) {
            ("linux", "x86_64") => Some(Self::LinuxX64),
            ("linux", "aarch64") => Some(Self::LinuxArm64),
            ("macos", "x86_64") => Some(Self::MacosX64),
            ("macos", "aarch64") => Some(Self::MacosArm64),
            ("windows", "x86_64") => Some(Self::WindowsX64),
            ("windows", "aarch64") => Some(Self::WindowsArm64),
            _ => None,
        }
    }

    /// Operating system family as used in mirror tables.
    pub fn os(&self) -> &'static str {
        match self {
            Self::LinuxX64 | Self::LinuxArm64 => "linux",
            Self::MacosX64 | Self::MacosArm64 => "darwin",
            Self::WindowsX64 | Self::WindowsArm64 => "windows",
        }
    }

    /// CPU architecture as used in mirror tables.
    pub fn arch(&self) -> &'static str {
        match self {
            Self::LinuxX64 | Self::MacosX64 | Self::WindowsX64 => "amd64",
            Self::LinuxArm64 | Self::MacosArm64 | Self::WindowsArm64 => "arm64",
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os() == "windows"
    }

    /// Returns a human-readable description of the platform.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::LinuxX64 => "Linux (x86_64)",
            Self::LinuxArm64 => "Linux (ARM64)",
            Self::MacosX64 => "macOS (Intel)",
            Self::MacosArm64 => "macOS (Apple Silicon)",
            Self::WindowsX64 => "Windows (x86_64)",
            Self::WindowsArm64 => "Windows (ARM64)",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

// ============================================================================
// Install Records
// ============================================================================

/// Persisted install and version state of one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DependencyInfo {
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
    /// Install directory.
    pub path: Option<PathBuf>,
    /// Resolved binary.
    pub exec_path: Option<PathBuf>,
    pub version: String,
    pub latest_version: String,
    /// The binary at `exec_path` was verified executable at the last check.
    pub available: bool,
    /// Only meaningful after a successful remote version check.
    pub need_update: bool,
}

impl DependencyInfo {
    pub fn new(dep_type: DependencyType) -> Self {
        Self {
            dep_type,
            ..Default::default()
        }
    }
}

/// Options for an install or update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadConfig {
    /// Explicit version; `None` or `"latest"` resolves the newest release.
    pub version: Option<String>,
    /// Mirror name; `None` picks the recommended mirror for the platform.
    pub mirror: Option<String>,
}

impl DownloadConfig {
    pub fn mirror(mirror: impl Into<String>) -> Self {
        Self {
            mirror: Some(mirror.into()),
            ..Default::default()
        }
    }

    /// The pinned version, if the caller asked for a specific one.
    pub fn pinned_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("latest"))
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Phase reported by install/update progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStage {
    Installing,
    Installed,
    Updating,
    Updated,
}

impl DependencyStage {
    /// Finished stage matching an in-flight one.
    pub fn finished(&self) -> Self {
        match self {
            Self::Installing | Self::Installed => Self::Installed,
            Self::Updating | Self::Updated => Self::Updated,
        }
    }
}

/// Install/update progress for one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyProgress {
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
    pub stage: DependencyStage,
    pub percentage: f64,
}

// ============================================================================
// Archive Formats
// ============================================================================

/// How a downloaded artifact is packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// The download is the executable itself.
    Raw,
    /// ZIP archive (.zip)
    Zip,
    /// XZ-compressed tar archive (.tar.xz)
    TarXz,
}

impl ArchiveFormat {
    /// Infers the archive format from a URL or filename.
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.ends_with(".zip") {
            Self::Zip
        } else if lower.ends_with(".tar.xz") {
            Self::TarXz
        } else {
            Self::Raw
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("unsupported mirror: {0}")]
    UnsupportedMirror(String),
    #[error("No provider registered for {0}")]
    NoProvider(DependencyType),
    #[error("{0} is not installed")]
    NotInstalled(DependencyType),
    #[error("{} is not an executable file", .0.display())]
    NotExecutable(PathBuf),
    #[error("{0} is already the latest version")]
    AlreadyUpToDate(DependencyType),
    #[error("No release version available for {0}")]
    NoLatestVersion(DependencyType),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error("Preference store error: {0}")]
    Preferences(#[from] SettingsError),
    #[error("Network error: {0:#}")]
    Network(anyhow::Error),
    #[error("Install failed: {0:#}")]
    Install(anyhow::Error),
}
