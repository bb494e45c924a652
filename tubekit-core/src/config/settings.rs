//! Application settings for tubekit.
//!
//! Settings are persisted to the SQLite database as JSON. Individual values are
//! changed through [`Settings::set_value`], which maps every known dotted key
//! to a typed setter.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use super::SettingsError;

/// Default capacity of each task's progress channel.
pub const DEFAULT_PROGRESS_CAPACITY: usize = 100;

/// Default capacity of the event bus ring buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// =============================================================================
// Application Settings
// =============================================================================

/// Application settings - persisted to database as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory for downloaded media. Falls back to the OS download dir.
    pub download_dir: Option<String>,

    /// Proxy URL (e.g. `http://127.0.0.1:7890`) for the extractor and HTTP client.
    pub proxy_url: Option<String>,

    /// Preferred mirror for extractor downloads.
    pub ytdlp_mirror: Option<String>,

    /// Preferred mirror for muxer downloads.
    pub ffmpeg_mirror: Option<String>,

    /// Capacity of each task's progress channel.
    pub progress_capacity: usize,

    /// Capacity of the event bus.
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: None,
            proxy_url: None,
            ytdlp_mirror: None,
            ffmpeg_mirror: None,
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

type Setter = fn(&mut Settings, &Value) -> Result<(), SettingsError>;

/// Every configuration key that can be changed at runtime.
const SETTERS: &[(&str, Setter)] = &[
    ("download.dir", set_download_dir),
    ("proxy.url", set_proxy_url),
    ("dependencies.ytdlp_mirror", set_ytdlp_mirror),
    ("dependencies.ffmpeg_mirror", set_ffmpeg_mirror),
    ("pipeline.progress_capacity", set_progress_capacity),
    ("events.capacity", set_event_capacity),
];

impl Settings {
    /// Load settings from database, using defaults for missing values.
    ///
    /// If settings don't exist or can't be parsed, returns defaults.
    pub fn load(db: &crate::db::Database) -> Self {
        let mut settings = Self::default();

        if let Ok(Some(json)) = db.get_setting("settings") {
            match serde_json::from_str::<Settings>(&json) {
                Ok(loaded) => settings = loaded,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse settings, using defaults");
                }
            }
        }

        settings.validate();
        settings
    }

    /// Save settings to database.
    pub fn save(&self, db: &crate::db::Database) -> anyhow::Result<()> {
        let json = serde_json::to_string(self)?;
        db.set_setting("settings", &json)?;
        Ok(())
    }

    /// Validate and clamp settings to valid ranges.
    pub fn validate(&mut self) {
        self.progress_capacity = self.progress_capacity.clamp(1, 10_000);
        self.event_capacity = self.event_capacity.clamp(16, 65_536);

        for field in [
            &mut self.download_dir,
            &mut self.proxy_url,
            &mut self.ytdlp_mirror,
            &mut self.ffmpeg_mirror,
        ] {
            if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *field = None;
            }
        }
    }

    /// Known configuration keys, in declaration order.
    pub fn keys() -> impl Iterator<Item = &'static str> {
        SETTERS.iter().map(|(key, _)| *key)
    }

    /// Set one value by its dotted key.
    ///
    /// `null` clears optional values. Numeric values are clamped by
    /// [`Settings::validate`] afterwards.
    pub fn set_value(&mut self, key: &str, value: &Value) -> Result<(), SettingsError> {
        let (_, setter) = SETTERS
            .iter()
            .find(|(k, _)| *k == key)
            .ok_or_else(|| SettingsError::UnknownKey(key.to_string()))?;
        setter(self, value)?;
        self.validate();
        Ok(())
    }

    /// Resolved download root.
    pub fn download_root(&self) -> Option<PathBuf> {
        self.download_dir
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| dirs::download_dir().map(|d| d.join("tubekit")))
            .or_else(|| dirs::home_dir().map(|h| h.join("Downloads").join("tubekit")))
    }
}

// =============================================================================
// Typed Setters
// =============================================================================

fn optional_string(key: &str, value: &Value) -> Result<Option<String>, SettingsError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            expected: "string or null",
        }),
    }
}

fn capacity(key: &str, value: &Value) -> Result<usize, SettingsError> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| SettingsError::InvalidValue {
            key: key.to_string(),
            expected: "positive integer",
        })
}

fn set_download_dir(s: &mut Settings, v: &Value) -> Result<(), SettingsError> {
    s.download_dir = optional_string("download.dir", v)?;
    Ok(())
}

fn set_proxy_url(s: &mut Settings, v: &Value) -> Result<(), SettingsError> {
    s.proxy_url = optional_string("proxy.url", v)?;
    Ok(())
}

fn set_ytdlp_mirror(s: &mut Settings, v: &Value) -> Result<(), SettingsError> {
    s.ytdlp_mirror = optional_string("dependencies.ytdlp_mirror", v)?;
    Ok(())
}

fn set_ffmpeg_mirror(s: &mut Settings, v: &Value) -> Result<(), SettingsError> {
    s.ffmpeg_mirror = optional_string("dependencies.ffmpeg_mirror", v)?;
    Ok(())
}

fn set_progress_capacity(s: &mut Settings, v: &Value) -> Result<(), SettingsError> {
    s.progress_capacity = capacity("pipeline.progress_capacity", v)?;
    Ok(())
}

fn set_event_capacity(s: &mut Settings, v: &Value) -> Result<(), SettingsError> {
    s.event_capacity = capacity("events.capacity", v)?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
