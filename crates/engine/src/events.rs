//! Progress events published by the engine.
//!
//! [`EventSink`] is a thin wrapper around a `tokio::sync::broadcast` channel.
//! Components receive a clone at construction and publish into it; reports
//! and progress output subscribe. With no subscriber, events are dropped.

use buildload_core::{ResultSet, SkewWarning, StageTiming};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Something that happened while generating load.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoadEvent {
    RunStarted {
        name: String,
    },
    RunCompleted {
        name: String,
        timing: StageTiming,
    },
    RunFailed {
        name: String,
        error: String,
    },
    /// A stage duration was clamped to zero.
    ClockSkew {
        name: String,
        warning: String,
    },
    LevelCompleted {
        level: usize,
        result: ResultSet,
    },
}

impl LoadEvent {
    pub(crate) fn clock_skew(name: &str, warning: &SkewWarning) -> Self {
        Self::ClockSkew {
            name: name.to_string(),
            warning: warning.to_string(),
        }
    }
}

/// Cloneable publishing handle for [`LoadEvent`]s.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<LoadEvent>,
}

impl EventSink {
    /// Create a sink with a specific channel capacity.
    ///
    /// Slow receivers observe `RecvError::Lagged` once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: LoadEvent) {
        // Only fails when nobody is subscribed.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoadEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
