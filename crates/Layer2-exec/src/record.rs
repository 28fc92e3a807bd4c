//! Process records tracked by the registry

use crate::state::{ProcessKind, ProcessStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Engine-assigned record identifier, monotonically increasing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything known about one spawned (or failed-to-spawn) process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: RecordId,

    /// OS pid (None when the spawn itself failed)
    pub pid: Option<u32>,

    /// Command string as given by the caller
    pub command: String,

    /// Program arguments (direct spawns only)
    pub args: Vec<String>,

    pub kind: ProcessKind,

    pub status: ProcessStatus,

    pub exit_code: Option<i32>,

    /// Signal used to end the process, e.g. `SIGKILL`
    pub signal: Option<String>,

    /// Failure description for `Error` records
    pub error: Option<String>,

    pub cwd: PathBuf,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,

    /// Last time output arrived (or the record was touched)
    pub last_activity: DateTime<Utc>,

    /// Effective timeout, if any
    pub timeout_ms: Option<u64>,

    /// started_at + timeout
    pub deadline: Option<DateTime<Utc>>,

    pub parent_pid: Option<u32>,

    pub children: BTreeSet<u32>,

    pub stdout: String,

    pub stderr: String,

    /// Captured bytes across both streams
    pub output_bytes: usize,

    /// Output was cut at the capture cap
    pub truncated: bool,

    /// The OS process has been waited on; its watcher finalizes the record
    pub reaped: bool,
}

impl ProcessRecord {
    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Time since start, or total run time once ended
    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    /// Time since the last output
    pub fn idle(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity).to_std().unwrap_or_default()
    }

    /// One-line description for status dumps
    pub fn describe(&self) -> String {
        let pid = self
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let outcome = match (self.exit_code, &self.signal) {
            (Some(code), _) => format!(" exit={}", code),
            (None, Some(signal)) => format!(" signal={}", signal),
            _ => String::new(),
        };
        format!(
            "{} pid={} [{}] {} {:.1}s{} :: {}",
            self.id,
            pid,
            self.kind,
            self.status,
            self.elapsed().as_secs_f64(),
            outcome,
            self.command
        )
    }
}

/// Parameters for a new record
#[derive(Debug, Clone)]
pub(crate) struct NewRecord {
    pub pid: Option<u32>,
    pub command: String,
    pub args: Vec<String>,
    pub kind: ProcessKind,
    pub cwd: PathBuf,
    pub timeout: Option<Duration>,
    pub parent_pid: Option<u32>,
}

/// How a record leaves the running state
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Exited on its own
    Exited(i32),
    /// Ended by a signal (name when known)
    Killed(Option<String>),
    /// Spawn or wait failure
    Failed(String),
}

impl Outcome {
    pub fn status(&self) -> ProcessStatus {
        match self {
            Outcome::Exited(_) => ProcessStatus::Completed,
            Outcome::Killed(_) => ProcessStatus::Killed,
            Outcome::Failed(_) => ProcessStatus::Error,
        }
    }
}
