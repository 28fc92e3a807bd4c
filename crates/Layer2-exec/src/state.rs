//! Process state machine
//!
//! ```text
//! RUNNING ──► COMPLETED | ERROR | KILLED
//!    │
//!    └──► ZOMBIE ──► COMPLETED | ERROR | KILLED   (or stays ZOMBIE if the kill fails)
//! ```

use serde::{Deserialize, Serialize};

/// Status of a tracked process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Spawned and not yet reaped
    Running,

    /// Exited on its own (any exit code)
    Completed,

    /// Failed to spawn or to be waited on
    Error,

    /// Terminated by a signal (timeout, supervisor or external)
    Killed,

    /// Anomaly found by the supervisor, kill pending
    Zombie,
}

impl ProcessStatus {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Error | ProcessStatus::Killed
        )
    }

    /// Running or zombie: still owned by the OS as far as we know
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessStatus::Running | ProcessStatus::Zombie)
    }

    /// Whether `next` is a forward transition from this state
    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        match self {
            ProcessStatus::Running => next != ProcessStatus::Running,
            ProcessStatus::Zombie => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Error => "error",
            ProcessStatus::Killed => "killed",
            ProcessStatus::Zombie => "zombie",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a process was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// `exec` / `run` / `pipe`
    Exec,
    /// `exec_streaming` / `exec_with_progress`
    Streaming,
    /// Direct program spawn, no shell, no timeout
    Spawn,
    /// Shell command without timeout
    Background,
    /// Interactive session shell
    Session,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Exec => "exec",
            ProcessKind::Streaming => "streaming",
            ProcessKind::Spawn => "spawn",
            ProcessKind::Background => "background",
            ProcessKind::Session => "session",
        }
    }
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
