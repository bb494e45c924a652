//! Mirror catalog with hardcoded download templates.
//!
//! Templates contain `{version}` and `{filename}` placeholders. Which template
//! applies depends on the dependency, the mirror name and the platform.

use anyhow::Context;
use serde::Deserialize;

use super::types::{DependencyError, DependencyType, Platform};

// ============================================================================
// Mirror Metadata
// ============================================================================

/// A named download source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mirror {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

const GITHUB: Mirror = Mirror {
    name: "github",
    display_name: "GitHub Official",
    description: "Official GitHub release assets",
};

const GHPROXY: Mirror = Mirror {
    name: "ghproxy",
    display_name: "GitHub Proxy",
    description: "GitHub release assets through gh-proxy.com",
};

const EVERMEET: Mirror = Mirror {
    name: "evermeet",
    display_name: "Evermeet",
    description: "Static macOS builds",
};

/// Mirror used when no table entry exists.
pub const FALLBACK_MIRROR: &str = "ghproxy";

// ============================================================================
// yt-dlp
// ============================================================================

const YTDLP_TEMPLATES: &[(&str, &str)] = &[
    (
        "github",
        "https://github.com/yt-dlp/yt-dlp/releases/download/{version}/{filename}",
    ),
    (
        "ghproxy",
        "https://gh-proxy.com/github.com/yt-dlp/yt-dlp/releases/download/{version}/{filename}",
    ),
];

/// Latest-release endpoint for yt-dlp (GitHub `tag_name`).
pub const YTDLP_RELEASE_API: &str = "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";

/// Release asset name of the standalone yt-dlp binary.
pub fn ytdlp_asset_name(platform: Platform) -> &'static str {
    match platform {
        Platform::MacosX64 | Platform::MacosArm64 => "yt-dlp_macos",
        Platform::LinuxX64 => "yt-dlp_linux",
        Platform::LinuxArm64 => "yt-dlp_linux_aarch64",
        Platform::WindowsX64 | Platform::WindowsArm64 => "yt-dlp.exe",
    }
}

// ============================================================================
// ffmpeg
// ============================================================================

const BTBN_GITHUB: &str =
    "https://github.com/BtbN/FFmpeg-Builds/releases/download/{version}/{filename}";
const BTBN_GHPROXY: &str =
    "https://gh-proxy.com/github.com/BtbN/FFmpeg-Builds/releases/download/{version}/{filename}";
const BTBN_RELEASE_API: &str = "https://api.github.com/repos/BtbN/FFmpeg-Builds/releases/latest";

const EVERMEET_TEMPLATE: &str = "https://evermeet.cx/ffmpeg/{filename}-{version}.zip";
const EVERMEET_RELEASE_API: &str = "https://evermeet.cx/ffmpeg/info/ffmpeg/snapshot";

/// How a latest-release endpoint reports its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFeed {
    /// GitHub releases API, version in `tag_name`.
    GitHub,
    /// evermeet.cx info API, version in `version`.
    Evermeet,
}

#[derive(Deserialize)]
struct GitHubRelease {
    #[serde(default)]
    tag_name: String,
}

#[derive(Deserialize)]
struct EvermeetInfo {
    #[serde(default)]
    version: String,
}

impl ReleaseFeed {
    /// Extracts the version tag from a latest-release response body.
    ///
    /// A missing tag yields an empty string rather than an error.
    pub fn parse_latest(&self, body: &str) -> anyhow::Result<String> {
        let tag = match self {
            Self::GitHub => {
                serde_json::from_str::<GitHubRelease>(body)
                    .context("Failed to parse GitHub release response")?
                    .tag_name
            }
            Self::Evermeet => {
                serde_json::from_str::<EvermeetInfo>(body)
                    .context("Failed to parse evermeet release response")?
                    .version
            }
        };
        Ok(tag.trim().to_string())
    }
}

/// One (platform, mirror) entry for ffmpeg.
struct FfmpegEntry {
    os: &'static str,
    mirror: &'static str,
    template: &'static str,
    release_api: &'static str,
    feed: ReleaseFeed,
}

const FFMPEG_ENTRIES: &[FfmpegEntry] = &[
    FfmpegEntry {
        os: "windows",
        mirror: "ghproxy",
        template: BTBN_GHPROXY,
        release_api: BTBN_RELEASE_API,
        feed: ReleaseFeed::GitHub,
    },
    FfmpegEntry {
        os: "windows",
        mirror: "github",
        template: BTBN_GITHUB,
        release_api: BTBN_RELEASE_API,
        feed: ReleaseFeed::GitHub,
    },
    FfmpegEntry {
        os: "linux",
        mirror: "ghproxy",
        template: BTBN_GHPROXY,
        release_api: BTBN_RELEASE_API,
        feed: ReleaseFeed::GitHub,
    },
    FfmpegEntry {
        os: "linux",
        mirror: "github",
        template: BTBN_GITHUB,
        release_api: BTBN_RELEASE_API,
        feed: ReleaseFeed::GitHub,
    },
    FfmpegEntry {
        os: "darwin",
        mirror: "evermeet",
        template: EVERMEET_TEMPLATE,
        release_api: EVERMEET_RELEASE_API,
        feed: ReleaseFeed::Evermeet,
    },
];

fn ffmpeg_entry(mirror: &str, platform: Platform) -> Result<&'static FfmpegEntry, DependencyError> {
    FFMPEG_ENTRIES
        .iter()
        .find(|e| e.os == platform.os() && e.mirror == mirror)
        .ok_or_else(|| DependencyError::UnsupportedMirror(mirror.to_string()))
}

/// Archive name (or evermeet file stem) of the ffmpeg build.
pub fn ffmpeg_asset_name(platform: Platform) -> &'static str {
    match platform {
        Platform::WindowsX64 => "ffmpeg-master-latest-win64-gpl.zip",
        Platform::WindowsArm64 => "ffmpeg-master-latest-winarm64-gpl.zip",
        Platform::LinuxX64 => "ffmpeg-master-latest-linux64-gpl.tar.xz",
        Platform::LinuxArm64 => "ffmpeg-master-latest-linuxarm64-gpl.tar.xz",
        Platform::MacosX64 | Platform::MacosArm64 => "ffmpeg",
    }
}

// ============================================================================
// Lookups
// ============================================================================

/// Mirrors offered for a dependency on a platform.
pub fn mirrors(dep_type: DependencyType, platform: Platform) -> Vec<Mirror> {
    let known = [GITHUB, GHPROXY, EVERMEET];
    let names: Vec<&str> = match dep_type {
        DependencyType::YtDlp => YTDLP_TEMPLATES.iter().map(|(name, _)| *name).collect(),
        DependencyType::Ffmpeg => FFMPEG_ENTRIES
            .iter()
            .filter(|e| e.os == platform.os())
            .map(|e| e.mirror)
            .collect(),
    };
    known
        .into_iter()
        .filter(|m| names.contains(&m.name))
        .collect()
}

/// Default mirror for a dependency on a platform.
pub fn recommended_mirror(dep_type: DependencyType, platform: Platform) -> &'static str {
    match (dep_type, platform.os()) {
        (DependencyType::Ffmpeg, "darwin") => "evermeet",
        (DependencyType::Ffmpeg, "linux") => "github",
        (DependencyType::YtDlp, "linux") => "github",
        _ => FALLBACK_MIRROR,
    }
}

fn fill(template: &str, version: &str, filename: &str) -> String {
    template
        .replace("{version}", version)
        .replace("{filename}", filename)
}

/// Download URL for a dependency release.
pub fn download_url(
    dep_type: DependencyType,
    mirror: &str,
    version: &str,
    platform: Platform,
) -> Result<String, DependencyError> {
    match dep_type {
        DependencyType::YtDlp => {
            let (_, template) = YTDLP_TEMPLATES
                .iter()
                .find(|(name, _)| *name == mirror)
                .ok_or_else(|| DependencyError::UnsupportedMirror(mirror.to_string()))?;
            Ok(fill(template, version, ytdlp_asset_name(platform)))
        }
        DependencyType::Ffmpeg => {
            let entry = ffmpeg_entry(mirror, platform)?;
            Ok(fill(entry.template, version, ffmpeg_asset_name(platform)))
        }
    }
}

/// Latest-release endpoint for a dependency and how to read it.
pub fn release_api(
    dep_type: DependencyType,
    mirror: &str,
    platform: Platform,
) -> Result<(&'static str, ReleaseFeed), DependencyError> {
    match dep_type {
        DependencyType::YtDlp => Ok((YTDLP_RELEASE_API, ReleaseFeed::GitHub)),
        DependencyType::Ffmpeg => {
            let entry = ffmpeg_entry(mirror, platform)?;
            Ok((entry.release_api, entry.feed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ytdlp_urls() {
        assert_eq!(
            download_url(DependencyType::YtDlp, "github", "2024.03.10", Platform::LinuxX64)
                .unwrap(),
            "https://github.com/yt-dlp/yt-dlp/releases/download/2024.03.10/yt-dlp_linux"
        );
        assert_eq!(
            download_url(DependencyType::YtDlp, "ghproxy", "2024.03.10", Platform::WindowsX64)
                .unwrap(),
            "https://gh-proxy.com/github.com/yt-dlp/yt-dlp/releases/download/2024.03.10/yt-dlp.exe"
        );
        assert!(download_url(DependencyType::YtDlp, "github", "1", Platform::LinuxArm64)
            .unwrap()
            .ends_with("yt-dlp_linux_aarch64"));
    }

    #[test]
    fn test_unsupported_mirror_names_the_mirror() {
        let err =
            download_url(DependencyType::YtDlp, "sourceforge", "1", Platform::LinuxX64).unwrap_err();
        assert_eq!(err.to_string(), "unsupported mirror: sourceforge");

        // evermeet only serves macOS
        let err =
            download_url(DependencyType::Ffmpeg, "evermeet", "7.1", Platform::WindowsX64).unwrap_err();
        assert!(matches!(err, DependencyError::UnsupportedMirror(m) if m == "evermeet"));
    }

    #[test]
    fn test_ffmpeg_urls() {
        assert_eq!(
            download_url(DependencyType::Ffmpeg, "evermeet", "7.1", Platform::MacosArm64).unwrap(),
            "https://evermeet.cx/ffmpeg/ffmpeg-7.1.zip"
        );
        assert_eq!(
            download_url(DependencyType::Ffmpeg, "ghproxy", "latest", Platform::WindowsX64)
                .unwrap(),
            "https://gh-proxy.com/github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-win64-gpl.zip"
        );
    }

    #[test]
    fn test_recommended_mirror_is_supported() {
        let platforms = [
            Platform::LinuxX64,
            Platform::LinuxArm64,
            Platform::MacosX64,
            Platform::MacosArm64,
            Platform::WindowsX64,
            Platform::WindowsArm64,
        ];
        for dep in DependencyType::all() {
            for platform in platforms {
                let mirror = recommended_mirror(*dep, platform);
                assert!(
                    download_url(*dep, mirror, "1.0", platform).is_ok(),
                    "{} on {} via {}",
                    dep,
                    platform,
                    mirror
                );
            }
        }
    }

    #[test]
    fn test_release_api() {
        let (url, feed) =
            release_api(DependencyType::Ffmpeg, "evermeet", Platform::MacosX64).unwrap();
        assert_eq!(url, EVERMEET_RELEASE_API);
        assert_eq!(feed, ReleaseFeed::Evermeet);

        let (url, feed) = release_api(DependencyType::YtDlp, "ghproxy", Platform::LinuxX64).unwrap();
        assert_eq!(url, YTDLP_RELEASE_API);
        assert_eq!(feed, ReleaseFeed::GitHub);
    }

    #[test]
    fn test_parse_latest() {
        let github = r#"{"name":"yt-dlp 2024.12.06","tag_name":"2024.12.06","html_url":"x"}"#;
        assert_eq!(ReleaseFeed::GitHub.parse_latest(github).unwrap(), "2024.12.06");

        let evermeet = r#"{"name":"ffmpeg","version":"7.1","download":{}}"#;
        assert_eq!(ReleaseFeed::Evermeet.parse_latest(evermeet).unwrap(), "7.1");

        assert_eq!(ReleaseFeed::GitHub.parse_latest("{}").unwrap(), "");
        assert!(ReleaseFeed::GitHub.parse_latest("<html>").is_err());
    }

    #[test]
    fn test_mirror_listing() {
        let names: Vec<_> = mirrors(DependencyType::Ffmpeg, Platform::MacosArm64)
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["evermeet"]);

        let names: Vec<_> = mirrors(DependencyType::YtDlp, Platform::LinuxX64)
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["github", "ghproxy"]);
    }
}
