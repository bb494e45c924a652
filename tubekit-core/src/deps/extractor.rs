//! Archive extraction and executable placement.
//!
//! Pulls a single named binary out of a downloaded zip or tar.xz package,
//! sets executable permissions, and moves staged files into their final
//! location.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use super::types::ArchiveFormat;

// ============================================================================
// Archive Extraction
// ============================================================================

/// Copies the entry named `binary_name` (at any depth) out of an archive.
///
/// Only the file contents are written, to `out`; entry paths are never used
/// as destinations so hostile paths cannot escape.
pub fn extract_binary(
    archive_path: &Path,
    format: ArchiveFormat,
    binary_name: &str,
    out: &mut File,
) -> Result<()> {
    info!(
        "Extracting {} from {:?} archive {}",
        binary_name,
        format,
        archive_path.display()
    );

    let found = match format {
        ArchiveFormat::Zip => extract_from_zip(archive_path, binary_name, out)?,
        ArchiveFormat::TarXz => extract_from_tar_xz(archive_path, binary_name, out)?,
        ArchiveFormat::Raw => {
            anyhow::bail!("Raw downloads are not archives; nothing to extract")
        }
    };

    if !found {
        anyhow::bail!(
            "Could not find {} in {}",
            binary_name,
            archive_path.display()
        );
    }

    out.flush().context("Failed to flush extracted binary")?;
    Ok(())
}

fn entry_matches(path: &Path, binary_name: &str) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(binary_name)
}

fn extract_from_zip(archive_path: &Path, binary_name: &str, out: &mut File) -> Result<bool> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open zip: {}", archive_path.display()))?;

    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip: {}", archive_path.display()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(path) = entry.enclosed_name() else {
            debug!("Skipping unsafe path in zip");
            continue;
        };
        if entry_matches(&path, binary_name) {
            io::copy(&mut entry, out)?;
            debug!("Extracted {} from zip", path.display());
            return Ok(true);
        }
    }

    Ok(false)
}

fn extract_from_tar_xz(archive_path: &Path, binary_name: &str, out: &mut File) -> Result<bool> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open tar.xz: {}", archive_path.display()))?;

    let decoder = xz2::read::XzDecoder::new(BufReader::new(file));
    extract_from_tar(decoder, binary_name, out)
}

fn extract_from_tar<R: Read>(reader: R, binary_name: &str, out: &mut File) -> Result<bool> {
    let mut archive = tar::Archive::new(reader);

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping symlink/hardlink in tar archive");
            continue;
        }
        if !entry_type.is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        if entry_matches(&path, binary_name) {
            io::copy(&mut entry, out)?;
            debug!("Extracted {} from tar", path.display());
            return Ok(true);
        }
    }

    Ok(false)
}

// ============================================================================
// Permissions
// ============================================================================

/// Sets executable permission on a file (Unix only).
///
/// On Windows, this is a no-op.
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for {}", path.display()))?;

        let mut permissions = metadata.permissions();
        let current_mode = permissions.mode();
        permissions.set_mode(current_mode | 0o755);

        fs::set_permissions(path, permissions).with_context(|| {
            format!("Failed to set executable permission on {}", path.display())
        })?;

        debug!("Set executable permission on {}", path.display());
    }

    Ok(())
}

/// Whether `path` is a regular file the current platform would execute.
pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

// ============================================================================
// Placement
// ============================================================================

/// Moves a fully written staging file to `dest`.
///
/// Tries an atomic rename first; when that fails (e.g. across devices) the
/// file is copied and its permissions fixed. The staging file is removed in
/// both cases.
pub fn relocate(staged: TempPath, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    match staged.persist(dest) {
        Ok(()) => {
            debug!("Renamed staged file to {}", dest.display());
            Ok(())
        }
        Err(e) => {
            warn!(
                error = %e.error,
                "Atomic rename to {} failed, copying instead",
                dest.display()
            );
            let staged = e.path;
            fs::copy(&staged, dest).with_context(|| {
                format!("Failed to copy {} to {}", staged.display(), dest.display())
            })?;
            make_executable(dest)?;
            Ok(())
        }
    }
}
