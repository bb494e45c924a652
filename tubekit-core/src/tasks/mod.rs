//! Task records and the registry that owns them.
//!
//! - `types`: Task, Stage, TaskType, requests and progress notifications
//! - `formats`: recode targets selectable by id
//! - `store`: durable key-value backing (`TaskStore`)
//! - `registry`: lock-protected in-memory index with write-through

pub mod formats;
mod registry;
mod store;
mod types;

pub use formats::{ConversionFormat, ConversionFormats, FormatKind};
pub use registry::TaskRegistry;
pub use store::TaskStore;
pub use types::{
    DownloadRequest, ProgressEvent, QuickDownloadRequest, Stage, Task, TaskSignal, TaskType,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Malformed task record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Unknown conversion format: {0}")]
    UnknownFormat(u32),
    #[error("Conversion format not supported: {0}")]
    FormatUnavailable(String),
}
