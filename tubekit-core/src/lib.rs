//! Tubekit Core Library
//!
//! This crate provides the task orchestration engine behind tubekit, a media
//! download manager driving yt-dlp and ffmpeg. It includes:
//!
//! - Task registry with write-through SQLite persistence
//! - Pipeline workers moving each task through its download stages
//! - Bounded, lossy progress streaming into an in-process event bus
//! - Dependency lifecycle management for yt-dlp and ffmpeg
//! - Configuration management (settings, preferences)
//! - An engine facade exposing the command surface to front ends

pub mod config;
pub mod db;
pub mod deps;
pub mod engine;
pub mod events;
pub mod pipeline;
pub mod tasks;

// Re-exports for convenience
pub use config::{PreferenceStore, Settings, SettingsError};
pub use db::{Database, SharedDatabase};

// Re-export engine
pub use engine::{CommandResponse, Engine, TaskHandle};

// Re-export events
pub use events::{BusEvent, EventBus, EventPayload, Topic};

// Re-export dependency management
pub use deps::{
    DependencyError, DependencyInfo, DependencyManager, DependencyProgress, DependencyStage,
    DependencyType, DownloadConfig, Platform,
};

// Re-export pipeline
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, VideoMetadata};

// Re-export tasks
pub use tasks::{
    ConversionFormat, ConversionFormats, DownloadRequest, ProgressEvent, QuickDownloadRequest,
    Stage, Task, TaskError, TaskRegistry, TaskSignal, TaskType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
