//! Conversion formats a download can be recoded into.
//!
//! Requests name a target by its numeric id; `0` means "keep the downloaded
//! container". The id resolves to the extension handed to yt-dlp's
//! `--recode-video`.

use serde::Serialize;

use super::TaskError;
use FormatKind::{Audio, Video};

/// Whether a format holds video or only audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Video,
    Audio,
}

/// One recode target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionFormat {
    pub id: u32,
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: FormatKind,
    pub extension: &'static str,
    /// yt-dlp can recode into this container.
    pub available: bool,
}

/// Formats grouped by kind, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionFormats {
    pub video: Vec<ConversionFormat>,
    pub audio: Vec<ConversionFormat>,
}

const fn format(
    id: u32,
    name: &'static str,
    kind: FormatKind,
    extension: &'static str,
    available: bool,
) -> ConversionFormat {
    ConversionFormat {
        id,
        name,
        kind,
        extension,
        available,
    }
}

/// Built-in catalog. Ids are persisted on tasks and must never be reused.
const CATALOG: &[ConversionFormat] = &[
    format(1, "MP4", Video, "mp4", true),
    format(2, "MKV", Video, "mkv", true),
    format(3, "WebM", Video, "webm", true),
    format(4, "MOV", Video, "mov", true),
    format(5, "AVI", Video, "avi", true),
    format(6, "FLV", Video, "flv", true),
    format(7, "GIF", Video, "gif", true),
    format(8, "WMV", Video, "wmv", false),
    format(20, "MP3", Audio, "mp3", true),
    format(21, "M4A", Audio, "m4a", true),
    format(22, "FLAC", Audio, "flac", true),
    format(23, "Opus", Audio, "opus", true),
    format(24, "Ogg", Audio, "ogg", true),
    format(25, "WAV", Audio, "wav", true),
    format(26, "AIFF", Audio, "aiff", true),
    format(27, "ALAC", Audio, "alac", true),
    format(28, "MKA", Audio, "mka", true),
    format(29, "AAC", Audio, "aac", false),
];

fn grouped<'a>(formats: impl Iterator<Item = &'a ConversionFormat>) -> ConversionFormats {
    let mut out = ConversionFormats::default();
    for f in formats {
        match f.kind {
            Video => out.video.push(f.clone()),
            Audio => out.audio.push(f.clone()),
        }
    }
    out
}

/// Every known format, available or not.
pub fn all_formats() -> ConversionFormats {
    grouped(CATALOG.iter())
}

/// Formats a request may choose.
pub fn available_formats() -> ConversionFormats {
    grouped(CATALOG.iter().filter(|f| f.available))
}

pub fn find_format(id: u32) -> Option<&'static ConversionFormat> {
    CATALOG.iter().find(|f| f.id == id)
}

/// Extension to recode into for `id`. `0` selects no recode.
pub fn recode_extension(id: u32) -> Result<Option<&'static str>, TaskError> {
    if id == 0 {
        return Ok(None);
    }
    match find_format(id) {
        Some(f) if f.available => Ok(Some(f.extension)),
        Some(f) => Err(TaskError::FormatUnavailable(f.name.to_string())),
        None => Err(TaskError::UnknownFormat(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let ids: HashSet<u32> = CATALOG.iter().map(|f| f.id).collect();
        assert_eq!(ids.len(), CATALOG.len());
        assert!(!ids.contains(&0));
    }

    #[test]
    fn test_grouping() {
        let all = all_formats();
        assert_eq!(all.video.len() + all.audio.len(), CATALOG.len());
        assert!(all.video.iter().all(|f| f.kind == FormatKind::Video));
        assert!(all.audio.iter().all(|f| f.kind == FormatKind::Audio));
        assert_eq!(all.video[0].extension, "mp4");
    }

    #[test]
    fn test_available_hides_unsupported() {
        let available = available_formats();
        assert!(available
            .video
            .iter()
            .chain(&available.audio)
            .all(|f| f.available));
        assert!(!available.video.iter().any(|f| f.extension == "wmv"));
        assert!(all_formats().video.iter().any(|f| f.extension == "wmv"));
    }

    #[test]
    fn test_recode_extension_lookup() {
        assert_eq!(recode_extension(0).unwrap(), None);
        assert_eq!(recode_extension(2).unwrap(), Some("mkv"));
        assert_eq!(recode_extension(20).unwrap(), Some("mp3"));

        assert!(matches!(
            recode_extension(999),
            Err(TaskError::UnknownFormat(999))
        ));
        assert!(matches!(
            recode_extension(8),
            Err(TaskError::FormatUnavailable(name)) if name == "WMV"
        ));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(available_formats()).unwrap();
        assert_eq!(json["video"][0]["type"], "video");
        assert_eq!(json["video"][0]["extension"], "mp4");
        assert_eq!(json["audio"][0]["id"], 20);
    }
}
