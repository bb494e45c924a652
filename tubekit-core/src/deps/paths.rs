//! Install locations and search-path probing.
//!
//! Managed binaries live under the user cache directory:
//!
//! - Linux: `~/.cache/tubekit/<dependency>/`
//! - macOS: `~/Library/Caches/tubekit/<dependency>/`
//! - Windows: `C:\Users\<User>\AppData\Local\tubekit\<dependency>\`

use std::path::{Path, PathBuf};

use super::types::Platform;

/// Subdirectory name under the user cache folder.
const TUBEKIT_CACHE_DIR: &str = "tubekit";

// ============================================================================
// Path Resolution
// ============================================================================

/// Returns the base cache directory, falling back to the OS temp folder.
pub fn get_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(TUBEKIT_CACHE_DIR)
}

/// Platform file name of an executable (`ffmpeg` / `ffmpeg.exe`).
pub fn executable_name(stem: &str, platform: Platform) -> String {
    if platform.is_windows() {
        format!("{}.exe", stem)
    } else {
        stem.to_string()
    }
}

// ============================================================================
// Search Path Probing
// ============================================================================

/// Looks a binary up through the standard OS search mechanism.
pub fn find_on_path(stem: &str) -> Option<PathBuf> {
    which::which(stem).ok()
}

/// Walks every `PATH` entry by hand looking for `file_name`.
///
/// Used where the standard lookup is unreliable (Windows resolves `PATHEXT`
/// and the current directory first).
pub fn scan_path_var(path_var: &str, file_name: &str) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// [`scan_path_var`] over the current process `PATH`.
pub fn scan_path(file_name: &str) -> Option<PathBuf> {
    let path_var = std::env::var("PATH").ok()?;
    scan_path_var(&path_var, file_name)
}

/// Directory holding `exec_path`, used as the install dir of system binaries.
pub fn parent_dir(exec_path: &Path) -> Option<PathBuf> {
    exec_path.parent().map(Path::to_path_buf)
}
