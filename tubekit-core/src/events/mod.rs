//! In-process event bus.
//!
//! Fans events out to every subscriber over a `tokio::sync::broadcast`
//! channel. Publishing never blocks; subscribers that fall behind lose the
//! oldest events and observe `RecvError::Lagged`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::deps::DependencyProgress;
use crate::tasks::{ProgressEvent, TaskSignal};

/// Name every event published by this crate carries as its source.
pub const EVENT_SOURCE: &str = "tubekit";

// ============================================================================
// Event Types
// ============================================================================

/// Event bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Topic {
    /// Dependency install/update progress.
    #[serde(rename = "dependency.progress")]
    DependencyProgress,
    /// Full progress updates for a task.
    #[serde(rename = "task.progress")]
    TaskProgress,
    /// Metadata fields of a task became available.
    #[serde(rename = "task.info_ready")]
    TaskInfoReady,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependencyProgress => "dependency.progress",
            Self::TaskProgress => "task.progress",
            Self::TaskInfoReady => "task.info_ready",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried by a [`BusEvent`].
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    DependencyProgress(DependencyProgress),
    TaskProgress(ProgressEvent),
    TaskInfoReady(TaskSignal),
}

impl EventPayload {
    pub fn topic(&self) -> Topic {
        match self {
            Self::DependencyProgress(_) => Topic::DependencyProgress,
            Self::TaskProgress(_) => Topic::TaskProgress,
            Self::TaskInfoReady(_) => Topic::TaskInfoReady,
        }
    }

    /// Task id the payload belongs to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskProgress(event) => Some(&event.id),
            Self::TaskInfoReady(signal) => Some(&signal.task_id),
            Self::DependencyProgress(_) => None,
        }
    }
}

/// Envelope for everything published on the bus.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub id: Uuid,
    pub topic: Topic,
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl BusEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: payload.topic(),
            source: EVENT_SOURCE,
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloneable publish/subscribe handle.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns how many subscribers received it.
    pub fn publish(&self, payload: EventPayload) -> usize {
        let event = BusEvent::new(payload);
        trace!(topic = %event.topic, "Publishing event");
        // No subscribers is not an error
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
