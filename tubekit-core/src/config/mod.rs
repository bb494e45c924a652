//! Configuration and preference management.

mod settings;

pub use settings::{Settings, DEFAULT_EVENT_CAPACITY, DEFAULT_PROGRESS_CAPACITY};

use std::path::PathBuf;
use thiserror::Error;

use crate::db::SharedDatabase;
use crate::deps::{DependencyInfo, DependencyType};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Malformed stored record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Unknown setting: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: expected {expected}")]
    InvalidValue { key: String, expected: &'static str },
    #[error("Could not determine a download directory")]
    NoDownloadDirectory,
}

// =============================================================================
// Preference Store
// =============================================================================

/// Durable preferences consumed by the dependency manager and the pipeline.
pub trait PreferenceStore: Send + Sync {
    /// Stored record for a dependency, if one was ever written.
    fn dependency_record(
        &self,
        dep_type: DependencyType,
    ) -> Result<Option<DependencyInfo>, SettingsError>;

    /// Replace the stored record for a dependency.
    fn set_dependency_record(
        &self,
        dep_type: DependencyType,
        info: &DependencyInfo,
    ) -> Result<(), SettingsError>;

    /// Root directory that downloads are written below.
    fn download_directory(&self) -> Result<PathBuf, SettingsError>;
}

impl PreferenceStore for SharedDatabase {
    fn dependency_record(
        &self,
        dep_type: DependencyType,
    ) -> Result<Option<DependencyInfo>, SettingsError> {
        let raw = self.lock().get_dependency(dep_type.as_str())?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(SettingsError::from)
    }

    fn set_dependency_record(
        &self,
        dep_type: DependencyType,
        info: &DependencyInfo,
    ) -> Result<(), SettingsError> {
        let json = serde_json::to_string(info)?;
        self.lock().save_dependency(dep_type.as_str(), &json)?;
        Ok(())
    }

    fn download_directory(&self) -> Result<PathBuf, SettingsError> {
        let settings = Settings::load(&self.lock());
        settings
            .download_root()
            .ok_or(SettingsError::NoDownloadDirectory)
    }
}
