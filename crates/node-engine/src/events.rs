//! Event types for streaming pass progress
//!
//! Events are sent from the runtime to the UI (or any consumer) to report
//! pass boundaries, node progress, errors and job state. The core never
//! reads anything back from the sink.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Trait for sending runtime events
///
/// This abstracts over the transport (channel, UI thread queue, log)
/// so the runtime can be embedded anywhere.
pub trait EventSink: Send + Sync {
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: NodeEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while the graph executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeEvent {
    /// A pass started
    #[serde(rename_all = "camelCase")]
    PassStarted { pass: u64, nodes: usize },

    /// Every node of the pass is done
    #[serde(rename_all = "camelCase")]
    PassCompleted {
        pass: u64,
        /// Deferred sets changed attribute sources, another pass follows
        changed: bool,
    },

    /// A node body was dispatched
    #[serde(rename_all = "camelCase")]
    NodeStarted { path: String },

    /// A node body finished successfully
    #[serde(rename_all = "camelCase")]
    NodeCompleted { path: String, exe_time: f64 },

    /// A node body failed
    #[serde(rename_all = "camelCase")]
    NodeFailed { path: String, error: String },

    /// Progress reported by a running body
    #[serde(rename_all = "camelCase")]
    NodeProgress {
        path: String,
        progress: f64,
        message: String,
    },

    /// Progress of a background job
    #[serde(rename_all = "camelCase")]
    JobProgress {
        path: String,
        progress: f64,
        message: String,
        done: bool,
    },
}

impl NodeEvent {
    pub fn node_progress(path: &str, progress: f64, message: &str) -> Self {
        Self::NodeProgress {
            path: path.to_string(),
            progress,
            message: message.to_string(),
        }
    }

    pub fn node_failed(path: &str, error: &str) -> Self {
        Self::NodeFailed {
            path: path.to_string(),
            error: error.to_string(),
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: NodeEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<NodeEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<NodeEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: NodeEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Sink that writes events to the log
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn send(&self, event: NodeEvent) -> Result<(), EventError> {
        match &event {
            NodeEvent::NodeFailed { path, error } => log::warn!("'{}' failed: {}", path, error),
            NodeEvent::NodeProgress { .. } | NodeEvent::JobProgress { .. } => log::trace!("{:?}", event),
            _ => log::debug!("{:?}", event),
        }
        Ok(())
    }
}
