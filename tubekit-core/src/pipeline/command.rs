//! yt-dlp invocation building.
//!
//! Commands are assembled as plain data ([`Invocation`]) so the argument
//! rules can be checked without spawning anything.

use std::path::PathBuf;
use std::process::Stdio;

use super::metadata::VideoMetadata;
use crate::tasks::{Task, TaskType};

/// Output file name template.
pub const OUTPUT_TEMPLATE: &str = "%(title)s_%(height)sp_%(fps)dfps.%(ext)s";

/// Marks machine-readable progress lines on stdout.
pub const PROGRESS_PREFIX: &str = "[tubekit]";

/// Metadata fields carried on every progress line.
const INFO_FIELDS: &str =
    "extractor,title,thumbnail,uploader,series,duration,ext,filesize,filesize_approx,resolution,width,height";

// ============================================================================
// Invocation
// ============================================================================

/// A fully specified external process run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub work_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Adds `flag value`.
    pub fn opt(&mut self, flag: &str, value: impl Into<String>) -> &mut Self {
        self.args.push(flag.to_string());
        self.args.push(value.into());
        self
    }

    pub fn env(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Value following `flag`, if present.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// A process builder with piped output and no stdin.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        // Headless environment
        cmd.env("TERM", "dumb");
        cmd.env("NO_COLOR", "1");

        // No console window flash on Windows
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000);

        cmd
    }
}

// ============================================================================
// Command Context
// ============================================================================

/// Host-side inputs shared by every yt-dlp run.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub ytdlp: PathBuf,
    /// Passed as `--ffmpeg-location` for merges and recodes.
    pub ffmpeg: Option<PathBuf>,
    /// Netscape cookie file.
    pub cookies: Option<PathBuf>,
    /// Exported as `HTTP_PROXY` / `HTTPS_PROXY`.
    pub proxy: Option<String>,
    /// Exported as `TEMP` / `TMP`.
    pub temp_dir: Option<PathBuf>,
}

impl CommandContext {
    fn base(&self) -> Invocation {
        let mut inv = Invocation::new(&self.ytdlp);

        if let Some(proxy) = self.proxy.as_deref().filter(|p| !p.is_empty()) {
            inv.env("HTTP_PROXY", proxy).env("HTTPS_PROXY", proxy);
        }
        if let Some(temp) = &self.temp_dir {
            let temp = temp.display().to_string();
            inv.env("TEMP", temp.clone()).env("TMP", temp);
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            inv.opt("--ffmpeg-location", ffmpeg.display().to_string());
        }
        if let Some(cookies) = &self.cookies {
            inv.opt("--cookies", cookies.display().to_string());
        }

        inv
    }
}

// ============================================================================
// Format Selection
// ============================================================================

/// `--format` / `--merge-output-format` values for a request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormatSelection {
    pub format: Option<String>,
    pub merge_output_format: Option<&'static str>,
}

/// Picks the format selector for an explicit format id.
///
/// Video-only formats get the best matching audio track: m4a for mp4, webm
/// for webm, anything otherwise. An empty id leaves the choice to yt-dlp.
pub fn select_format(format_id: &str, metadata: Option<&VideoMetadata>) -> FormatSelection {
    if format_id.is_empty() {
        return FormatSelection::default();
    }

    let format = metadata.and_then(|m| m.format(format_id));
    let needs_audio = format.is_some_and(|f| f.is_video_only());
    if !needs_audio {
        return FormatSelection {
            format: Some(format_id.to_string()),
            merge_output_format: None,
        };
    }

    let (audio, merge) = match format.and_then(|f| f.ext.as_deref()) {
        Some("mp4") => ("bestaudio[ext=m4a]", "mp4"),
        Some("webm") => ("bestaudio[ext=webm]", "webm"),
        _ => ("bestaudio", "mp4/webm"),
    };

    FormatSelection {
        format: Some(format!("{}+{}", format_id, audio)),
        merge_output_format: Some(merge),
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Metadata-only run printing one JSON document.
pub fn metadata_invocation(ctx: &CommandContext, url: &str) -> Invocation {
    let mut inv = ctx.base();
    inv.arg("--skip-download")
        .arg("--dump-single-json")
        .arg("--no-playlist")
        .arg("--")
        .arg(url);
    inv
}

/// Download run for `task`.
///
/// `metadata` is consulted for custom tasks to decide whether the chosen
/// format needs a separate audio track.
pub fn download_invocation(
    ctx: &CommandContext,
    task: &Task,
    metadata: Option<&VideoMetadata>,
) -> Invocation {
    let mut inv = ctx.base();

    match task.task_type {
        TaskType::Custom => {
            let selection = select_format(&task.format_id, metadata);
            if let Some(format) = selection.format {
                inv.opt("--format", format);
            }
            if let Some(merge) = selection.merge_output_format {
                inv.opt("--merge-output-format", merge);
            }

            if task.download_subs {
                let langs = if task.sub_langs.is_empty() {
                    "all".to_string()
                } else {
                    task.sub_langs.join(",")
                };
                let sub_format = if task.sub_format.is_empty() {
                    "best"
                } else {
                    task.sub_format.as_str()
                };
                inv.arg("--write-subs")
                    .opt("--sub-langs", langs)
                    .opt("--sub-format", sub_format);
            }
        }
        TaskType::Quick | TaskType::Programmatic => {
            if !task.format_id.is_empty() && task.format_id != "best" {
                inv.opt("--format", task.format_id.clone());
            }
            if task.download_subs {
                inv.arg("--write-subs").opt("--sub-format", "best");
            }
        }
    }

    if !task.output_dir.is_empty() {
        inv.work_dir = Some(PathBuf::from(&task.output_dir));
    }

    inv.arg("--no-playlist")
        .arg("--no-overwrites")
        .opt("--output", OUTPUT_TEMPLATE);

    if let Some(ext) = task.recode_extension.as_deref().filter(|e| !e.is_empty()) {
        inv.opt("--recode-video", ext);
    }

    inv.arg("--newline").opt(
        "--progress-template",
        format!(
            "download:{} %(progress)j %(info.{{{}}})j",
            PROGRESS_PREFIX, INFO_FIELDS
        ),
    );

    inv.arg("--").arg(task.url.clone());
    inv
}
