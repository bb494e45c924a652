//! Post-download subtitle stages.
//!
//! Translation and embedding are opaque to the pipeline: each takes input
//! files and returns the path of the single artifact it produced.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::command::Invocation;
use crate::deps::{DependencyType, ToolResolver};

/// Translates a subtitle file.
#[async_trait]
pub trait SubtitleTranslator: Send + Sync {
    /// Writes a subtitle in `target_lang` and returns its path.
    ///
    /// `style` is the requested layout hint; empty lets the translator choose.
    async fn translate(&self, subtitle: &Path, target_lang: &str, style: &str) -> Result<PathBuf>;
}

/// Muxes a subtitle track into a video.
#[async_trait]
pub trait SubtitleEmbedder: Send + Sync {
    /// Writes a new video carrying `subtitle` and returns its path.
    async fn embed(&self, video: &Path, subtitle: &Path, lang: &str) -> Result<PathBuf>;
}

/// `dir/stem.<tag>.<ext>` next to `path`.
fn sibling(path: &Path, tag: &str, ext: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}.{}", stem, tag, ext))
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

// ============================================================================
// Translation
// ============================================================================

/// Stores the source cues under the target language's file name.
///
/// Used when no translation backend is configured, so downstream stages
/// still receive a subtitle for the requested language. Layout hints do not
/// apply to untranslated cues and are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughTranslator;

#[async_trait]
impl SubtitleTranslator for PassthroughTranslator {
    async fn translate(&self, subtitle: &Path, target_lang: &str, _style: &str) -> Result<PathBuf> {
        let ext = extension(subtitle);
        let target = sibling(subtitle, target_lang, &ext);
        tokio::fs::copy(subtitle, &target)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;

        debug!(source = %subtitle.display(), target = %target.display(), "Subtitle passed through");
        Ok(target)
    }
}

// ============================================================================
// Embedding
// ============================================================================

/// Embeds subtitles with ffmpeg, copying every existing stream.
pub struct FfmpegEmbedder {
    tools: Arc<dyn ToolResolver>,
}

impl FfmpegEmbedder {
    pub fn new(tools: Arc<dyn ToolResolver>) -> Self {
        Self { tools }
    }

    /// Subtitle codec the container accepts.
    fn subtitle_codec(container: &str) -> &'static str {
        match container {
            "mp4" | "m4v" | "mov" => "mov_text",
            "webm" => "webvtt",
            _ => "srt",
        }
    }

    /// ffmpeg arguments muxing `subtitle` into `video` as `output`.
    pub fn invocation(
        ffmpeg: &Path,
        video: &Path,
        subtitle: &Path,
        lang: &str,
        output: &Path,
    ) -> Invocation {
        let codec = Self::subtitle_codec(&extension(video));
        let mut inv = Invocation::new(ffmpeg);
        inv.arg("-y")
            .arg("-hide_banner")
            .opt("-loglevel", "error")
            .opt("-i", video.display().to_string())
            .opt("-i", subtitle.display().to_string())
            .opt("-map", "0")
            .opt("-map", "1")
            .opt("-c", "copy")
            .opt("-c:s", codec)
            .opt("-metadata:s:s:0", format!("language={}", lang))
            .arg(output.display().to_string());
        inv
    }
}

#[async_trait]
impl SubtitleEmbedder for FfmpegEmbedder {
    async fn embed(&self, video: &Path, subtitle: &Path, lang: &str) -> Result<PathBuf> {
        let ffmpeg = self.tools.executable(DependencyType::Ffmpeg).await?;
        let container = extension(video);
        let output = sibling(video, &format!("{}.embedded", lang), &container);

        let inv = Self::invocation(&ffmpeg, video, subtitle, lang, &output);
        let result = inv
            .to_command()
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", ffmpeg.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!("ffmpeg exited with {}: {}", result.status, stderr.trim());
        }

        info!(output = %output.display(), "Subtitles embedded");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_passthrough_names_target_language() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("Clip_720p_30fps.en.vtt");
        std::fs::write(&source, "WEBVTT\n\n00:00.000 --> 00:01.000\nHello\n").unwrap();

        let target = PassthroughTranslator
            .translate(&source, "es", "")
            .await.unwrap();
        assert_eq!(target, dir.path().join("Clip_720p_30fps.en.es.vtt"));
        assert!(std::fs::read_to_string(&target).unwrap().contains("Hello"));
    }

    #[tokio::test]
    async fn test_passthrough_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = PassthroughTranslator
            .translate(&dir.path().join("missing.srt"), "es", "")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to write"));
    }

    #[test]
    fn test_embed_invocation() {
        let inv = FfmpegEmbedder::invocation(
            Path::new("/bin/ffmpeg"),
            Path::new("/dl/Clip.mp4"),
            Path::new("/dl/Clip.es.srt"),
            "es",
            Path::new("/dl/Clip.es.embedded.mp4"),
        );
        assert_eq!(inv.value_of("-c:s"), Some("mov_text"));
        assert_eq!(inv.value_of("-metadata:s:s:0"), Some("language=es"));
        assert_eq!(
            inv.args.last().map(String::as_str),
            Some(Path::new("/dl/Clip.es.embedded.mp4").display().to_string().as_str())
        );
    }

    #[test]
    fn test_subtitle_codec_by_container() {
        assert_eq!(FfmpegEmbedder::subtitle_codec("webm"), "webvtt");
        assert_eq!(FfmpegEmbedder::subtitle_codec("mkv"), "srt");
        assert_eq!(FfmpegEmbedder::subtitle_codec("mov"), "mov_text");
    }

    #[test]
    fn test_sibling_paths() {
        assert_eq!(
            sibling(Path::new("/dl/a.mkv"), "es.embedded", "mkv"),
            PathBuf::from("/dl/a.es.embedded.mkv")
        );
    }
}
