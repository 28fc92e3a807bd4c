//! Engine events - typed lifecycle notifications
//!
//! Every variant carries its own payload; `name()` gives the stable event name
//! used by listener filters.

use crate::record::RecordId;
use crate::state::ProcessKind;
use crate::supervisor::{CleanupStats, ZombieRecord};
use hive_foundation::{BusEvent, EventSeverity, ProfileName, ShellType};
use serde::Serialize;

/// Kind of environment mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvChange {
    Set,
    Cleared,
    Blocked,
    Unblocked,
    Imported,
}

/// Lifecycle events published by the engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A process was spawned and registered
    Spawned {
        id: RecordId,
        pid: u32,
        command: String,
        kind: ProcessKind,
    },

    Stdout {
        id: RecordId,
        pid: u32,
        text: String,
    },

    Stderr {
        id: RecordId,
        pid: u32,
        text: String,
    },

    /// A process exited (on its own or by signal)
    Close {
        id: RecordId,
        pid: u32,
        exit_code: Option<i32>,
        signal: Option<String>,
        duration_ms: u64,
    },

    /// Spawn or wait failure
    Error {
        id: Option<RecordId>,
        pid: Option<u32>,
        command: String,
        message: String,
    },

    /// A process was killed for exceeding its timeout
    Timeout {
        id: RecordId,
        pid: u32,
        command: String,
        timeout_ms: u64,
    },

    /// A process crossed the warning fraction of its timeout
    TimeoutWarning {
        id: RecordId,
        pid: u32,
        command: String,
        elapsed_ms: u64,
        timeout_ms: u64,
    },

    ZombiesDetected {
        zombies: Vec<ZombieRecord>,
    },

    CleanupCompleted {
        stats: CleanupStats,
    },

    OrphanedProcess {
        id: RecordId,
        pid: u32,
        parent_pid: u32,
    },

    ShellFallback {
        requested: ShellType,
        fallback: ShellType,
    },

    ShellNotFound {
        requested: ShellType,
    },

    ShellChanged {
        from: ShellType,
        to: ShellType,
    },

    EnvChanged {
        key: Option<String>,
        change: EnvChange,
    },

    ProfileChanged {
        from: ProfileName,
        to: ProfileName,
    },

    SessionCreated {
        session_id: String,
        pid: u32,
        shell: ShellType,
    },

    SessionClosed {
        session_id: String,
    },

    /// Teardown started (signal, panic or explicit destroy)
    Shutdown {
        reason: String,
    },

    Destroyed,
}

impl BusEvent for EngineEvent {
    fn name(&self) -> &'static str {
        match self {
            EngineEvent::Spawned { .. } => "spawn",
            EngineEvent::Stdout { .. } => "stdout",
            EngineEvent::Stderr { .. } => "stderr",
            EngineEvent::Close { .. } => "close",
            EngineEvent::Error { .. } => "error",
            EngineEvent::Timeout { .. } => "timeout",
            EngineEvent::TimeoutWarning { .. } => "timeout-warning",
            EngineEvent::ZombiesDetected { .. } => "zombiesDetected",
            EngineEvent::CleanupCompleted { .. } => "cleanupCompleted",
            EngineEvent::OrphanedProcess { .. } => "orphanedProcess",
            EngineEvent::ShellFallback { .. } => "shellFallback",
            EngineEvent::ShellNotFound { .. } => "shellNotFound",
            EngineEvent::ShellChanged { .. } => "shellChanged",
            EngineEvent::EnvChanged { .. } => "envChanged",
            EngineEvent::ProfileChanged { .. } => "profileChanged",
            EngineEvent::SessionCreated { .. } => "sessionCreated",
            EngineEvent::SessionClosed { .. } => "sessionClosed",
            EngineEvent::Shutdown { .. } => "shutdown",
            EngineEvent::Destroyed => "destroyed",
        }
    }

    fn severity(&self) -> EventSeverity {
        match self {
            EngineEvent::Stdout { .. } | EngineEvent::Stderr { .. } => EventSeverity::Debug,
            EngineEvent::Error { .. }
            | EngineEvent::Timeout { .. }
            | EngineEvent::ShellNotFound { .. } => EventSeverity::Error,
            EngineEvent::TimeoutWarning { .. }
            | EngineEvent::ZombiesDetected { .. }
            | EngineEvent::OrphanedProcess { .. }
            | EngineEvent::ShellFallback { .. } => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }
}

impl EngineEvent {
    /// Pid the event is about, if any
    pub fn pid(&self) -> Option<u32> {
        match self {
            EngineEvent::Spawned { pid, .. }
            | EngineEvent::Stdout { pid, .. }
            | EngineEvent::Stderr { pid, .. }
            | EngineEvent::Close { pid, .. }
            | EngineEvent::Timeout { pid, .. }
            | EngineEvent::TimeoutWarning { pid, .. }
            | EngineEvent::OrphanedProcess { pid, .. }
            | EngineEvent::SessionCreated { pid, .. } => Some(*pid),
            EngineEvent::Error { pid, .. } => *pid,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let event = EngineEvent::Close {
            id: RecordId(3),
            pid: 10,
            exit_code: Some(0),
            signal: None,
            duration_ms: 5,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "close");
        assert_eq!(json["id"], 3);
        assert_eq!(json["pid"], 10);
        assert_eq!(event.pid(), Some(10));
    }

    #[test]
    fn test_names_and_severity() {
        let warning = EngineEvent::ShellFallback {
            requested: ShellType::Zsh,
            fallback: ShellType::Bash,
        };
        assert_eq!(warning.name(), "shellFallback");
        assert_eq!(warning.severity(), EventSeverity::Warning);

        assert_eq!(EngineEvent::Destroyed.name(), "destroyed");
        assert_eq!(EngineEvent::Destroyed.pid(), None);
    }
}
