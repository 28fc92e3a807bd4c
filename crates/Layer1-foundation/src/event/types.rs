//! Event Types - severity and history records shared by every event enum

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Event Severity
// ============================================================================

/// Event severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

// ============================================================================
// BusEvent
// ============================================================================

/// An event type that can travel on an [`EventBus`](super::EventBus).
///
/// Each variant of the implementing enum carries its own statically-typed
/// payload; `name()` is the stable wire name used for filtering.
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// Stable event name (e.g. `"timeout-warning"`)
    fn name(&self) -> &'static str;

    /// Severity, for listeners and logging
    fn severity(&self) -> EventSeverity {
        EventSeverity::Info
    }
}

// ============================================================================
// EventRecord - history entry
// ============================================================================

/// An event as kept in the bus history
#[derive(Debug, Clone)]
pub struct EventRecord<E> {
    /// Publish order, starting at 1
    pub seq: u64,

    /// Publish time
    pub timestamp: DateTime<Utc>,

    /// The event itself
    pub event: E,
}
