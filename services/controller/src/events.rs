//! Best-effort event recording.
//!
//! Recorders never fail and never block the pass; a missing recorder only
//! loses notices.

use std::fmt;
use std::sync::Mutex;

use podset_reconcile::NamespacedName;
use tracing::{info, warn};

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Warning => f.write_str("Warning"),
        }
    }
}

/// Reasons attached to events emitted by the controller.
pub mod reason {
    pub const SUCCESSFUL_CREATE: &str = "SuccessfulCreate";
    pub const FAILED_CREATE: &str = "FailedCreate";
    pub const SUCCESSFUL_DELETE: &str = "SuccessfulDelete";
    pub const FAILED_DELETE: &str = "FailedDelete";
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub object: NamespacedName,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Receives human-readable notices about controller actions.
pub trait EventRecorder: Send + Sync {
    fn record(&self, object: &NamespacedName, event_type: EventType, reason: &str, message: &str);
}

/// Emits events as log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, object: &NamespacedName, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => info!(object = %object, reason, message, "Event"),
            EventType::Warning => warn!(object = %object, reason, message, "Event"),
        }
    }
}

/// Discards events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl EventRecorder for NoopRecorder {
    fn record(&self, _: &NamespacedName, _: EventType, _: &str, _: &str) {}
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of events recorded with the given reason.
    pub fn count(&self, reason: &str) -> usize {
        self.events().iter().filter(|e| e.reason == reason).count()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, object: &NamespacedName, event_type: EventType, reason: &str, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(Event {
                object: object.clone(),
                event_type,
                reason: reason.to_string(),
                message: message.to_string(),
            });
        }
    }
}
