//! Browser cookie export for authenticated downloads.
//!
//! Cookies are exported once per task into a Netscape cookie file that lives
//! only as long as its [`CookieFile`] guard.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::command::Invocation;
use crate::deps::{DependencyType, ToolResolver};

const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

/// Exports a browser's cookies for one site.
#[async_trait]
pub trait CookieSource: Send + Sync {
    /// Netscape-format cookies of `browser` that apply to `url`.
    async fn export_cookies(&self, browser: &str, url: &str) -> Result<String>;
}

// ============================================================================
// Cookie File Guard
// ============================================================================

/// A cookie file on disk, removed when dropped.
#[derive(Debug)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    /// Writes `content` to `cookies-<task_id>.txt` in `dir`.
    pub async fn write(dir: &Path, task_id: &str, content: &str) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join(format!("cookies-{}.txt", task_id));
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CookieFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed cookie file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove cookie file"),
        }
    }
}

/// Exports cookies for a task, if it names a browser.
///
/// Export failures are logged and the task continues without cookies.
pub async fn acquire(
    source: &dyn CookieSource,
    browser: &str,
    url: &str,
    dir: &Path,
    task_id: &str,
) -> Option<CookieFile> {
    if browser.trim().is_empty() {
        return None;
    }

    let content = match source.export_cookies(browser, url).await {
        Ok(content) if has_cookies(&content) => content,
        Ok(_) => {
            debug!(task_id = %task_id, browser = %browser, "No cookies for site");
            return None;
        }
        Err(e) => {
            warn!(task_id = %task_id, browser = %browser, error = %e, "Cookie export failed");
            return None;
        }
    };

    match CookieFile::write(dir, task_id, &content).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Failed to store cookies");
            None
        }
    }
}

fn has_cookies(content: &str) -> bool {
    content
        .lines()
        .any(|line| !line.trim().is_empty() && !is_comment(line))
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') && !line.starts_with("#HttpOnly_")
}

// ============================================================================
// Domain Filtering
// ============================================================================

/// Keeps the cookies of a Netscape jar that apply to `host`.
pub fn filter_for_host(jar: &str, host: &str) -> String {
    let host = host.trim_start_matches("www.").to_ascii_lowercase();
    let mut out = String::from(NETSCAPE_HEADER);
    out.push('\n');

    for line in jar.lines() {
        if line.trim().is_empty() || is_comment(line) {
            continue;
        }
        let Some(domain) = line.split('\t').next() else {
            continue;
        };
        let domain = domain
            .trim_start_matches("#HttpOnly_")
            .trim_start_matches('.')
            .to_ascii_lowercase();

        let matches = host == domain
            || host.ends_with(&format!(".{}", domain))
            || domain.ends_with(&format!(".{}", host));
        if matches {
            out.push_str(line);
            out.push('\n');
        }
    }

    out
}

// ============================================================================
// yt-dlp Cookie Export
// ============================================================================

/// Reads browser cookies through yt-dlp's `--cookies-from-browser`.
///
/// yt-dlp saves its cookie jar to `--cookies` on exit; the jar is then cut
/// down to the target site.
pub struct YtDlpCookieExporter {
    tools: Arc<dyn ToolResolver>,
}

impl YtDlpCookieExporter {
    pub fn new(tools: Arc<dyn ToolResolver>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl CookieSource for YtDlpCookieExporter {
    async fn export_cookies(&self, browser: &str, url: &str) -> Result<String> {
        let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        let host = parsed
            .host_str()
            .with_context(|| format!("URL has no host: {}", url))?
            .to_string();

        let ytdlp = self.tools.executable(DependencyType::YtDlp).await?;
        let jar = tempfile::Builder::new()
            .prefix("tubekit-jar-")
            .suffix(".txt")
            .tempfile()
            .context("Failed to create cookie jar")?
            .into_temp_path();

        let mut inv = Invocation::new(ytdlp);
        inv.opt("--cookies-from-browser", browser)
            .opt("--cookies", jar.display().to_string())
            .arg("--skip-download")
            .arg("--simulate")
            .arg("--no-playlist")
            .arg("--")
            .arg(url);

        let output = inv
            .to_command()
            .output()
            .await
            .context("Failed to run yt-dlp for cookie export")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Cookie export from {} failed: {}",
                browser,
                stderr.lines().last().unwrap_or_default()
            );
        }

        let content = tokio::fs::read_to_string(&jar)
            .await
            .context("Failed to read cookie jar")?;
        Ok(filter_for_host(&content, &host))
    }
}
