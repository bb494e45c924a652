//! Recovering produced file names from extractor output.
//!
//! yt-dlp has no structured "files written" report, so the human-readable
//! log is scanned line by line. The [`OutputParser`] trait keeps that
//! coupling in one replaceable place.

/// Files a download produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProducedFiles {
    /// Final video files, merged outputs first.
    pub video_files: Vec<String>,
    pub subtitle_files: Vec<String>,
    /// Every surviving file in the order it was written.
    pub all_files: Vec<String>,
}

/// Extracts produced files from a finished run's stdout.
pub trait OutputParser: Send + Sync {
    fn parse(&self, stdout: &str) -> ProducedFiles;
}

const SUBTITLE_EXTENSIONS: &[&str] = &[".vtt", ".srt", ".ass", ".ssa"];

/// Whether `path` names a subtitle file.
pub fn is_subtitle(path: &str) -> bool {
    let lower = path.to_lowercase();
    SUBTITLE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

// ============================================================================
// yt-dlp Log Parser
// ============================================================================

/// Parser for yt-dlp's default console output.
#[derive(Debug, Default, Clone, Copy)]
pub struct YtDlpOutputParser;

impl YtDlpOutputParser {
    /// File written by this line, if any.
    fn written(line: &str) -> Option<(&str, bool)> {
        if let Some(rest) = line.strip_prefix("[download] Destination: ") {
            return Some((rest.trim(), false));
        }
        if let Some(rest) = line
            .strip_prefix("[download] ")
            .and_then(|r| r.strip_suffix(" has already been downloaded"))
        {
            return Some((rest.trim(), false));
        }
        if let Some(rest) = line.strip_prefix("[Merger] Merging formats into ") {
            return Some((unquote(rest), true));
        }
        if line.starts_with("[VideoConvertor]") {
            if let Some((_, dest)) = line.split_once("Destination: ") {
                return Some((dest.trim(), true));
            }
        }
        None
    }

    fn deleted(line: &str) -> Option<&str> {
        let rest = line.split_once("Deleting original file ")?.1;
        let rest = rest.strip_suffix(" (pass -k to keep)").unwrap_or(rest);
        Some(rest.trim())
    }
}

impl OutputParser for YtDlpOutputParser {
    fn parse(&self, stdout: &str) -> ProducedFiles {
        let mut written: Vec<String> = Vec::new();
        let mut final_videos: Vec<String> = Vec::new();

        for line in stdout.lines() {
            let line = line.trim_end_matches('\r');
            if let Some((path, is_final)) = Self::written(line) {
                push_unique(&mut written, path);
                if is_final {
                    push_unique(&mut final_videos, path);
                }
            } else if let Some(path) = Self::deleted(line) {
                written.retain(|f| f != path);
                final_videos.retain(|f| f != path);
            }
        }

        let mut produced = ProducedFiles {
            video_files: final_videos,
            ..Default::default()
        };
        for path in &written {
            if is_subtitle(path) {
                push_unique(&mut produced.subtitle_files, path);
            } else {
                push_unique(&mut produced.video_files, path);
            }
        }
        produced.all_files = written;
        produced
    }
}
