//! Process registry - every process the engine ever started
//!
//! Records are keyed by `RecordId`; a pid index resolves to the most recent
//! record for that pid. All mutation is synchronous and the lock is never held
//! across an await point.

use crate::output::StreamKind;
use crate::record::{NewRecord, Outcome, ProcessRecord, RecordId};
use crate::state::ProcessStatus;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Live handle of a running record, dropped exactly when it stops running
struct LiveHandle {
    exited: watch::Sender<()>,
}

struct Entry {
    record: ProcessRecord,
    handle: Option<LiveHandle>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<RecordId, Entry>,
    by_pid: HashMap<u32, RecordId>,
}

/// Process-wide table of records
pub struct ProcessRegistry {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> RecordId {
        RecordId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn build(&self, new: NewRecord, status: ProcessStatus) -> ProcessRecord {
        let now = Utc::now();
        let timeout_ms = new.timeout.map(|t| t.as_millis() as u64);

        ProcessRecord {
            id: self.allocate_id(),
            pid: new.pid,
            command: new.command,
            args: new.args,
            kind: new.kind,
            status,
            exit_code: None,
            signal: None,
            error: None,
            cwd: new.cwd,
            started_at: now,
            ended_at: None,
            last_activity: now,
            timeout_ms,
            deadline: timeout_ms.map(|ms| now + chrono::Duration::milliseconds(ms as i64)),
            parent_pid: new.parent_pid,
            children: BTreeSet::new(),
            stdout: String::new(),
            stderr: String::new(),
            output_bytes: 0,
            truncated: false,
            reaped: false,
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a freshly spawned process as `Running`
    pub(crate) fn register(&self, new: NewRecord) -> RecordId {
        let record = self.build(new, ProcessStatus::Running);
        let id = record.id;
        let (exited, _) = watch::channel(());

        let mut inner = self.inner.write();

        if let (Some(pid), Some(parent)) = (record.pid, record.parent_pid) {
            if let Some(parent_id) = inner.by_pid.get(&parent).copied() {
                if let Some(entry) = inner.entries.get_mut(&parent_id) {
                    entry.record.children.insert(pid);
                }
            }
        }
        if let Some(pid) = record.pid {
            inner.by_pid.insert(pid, id);
        }

        debug!(id = %id, pid = ?record.pid, kind = %record.kind, "Registered process");
        inner.entries.insert(
            id,
            Entry {
                record,
                handle: Some(LiveHandle { exited }),
            },
        );

        id
    }

    /// Register a process that never started (terminal `Error` record)
    pub(crate) fn register_failed(&self, new: NewRecord, error: impl Into<String>) -> RecordId {
        let mut record = self.build(new, ProcessStatus::Error);
        record.error = Some(error.into());
        record.ended_at = Some(record.started_at);
        let id = record.id;

        self.inner
            .write()
            .entries
            .insert(id, Entry { record, handle: None });

        id
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Append captured output and refresh the activity clock
    pub(crate) fn append_output(&self, id: RecordId, stream: StreamKind, text: &str) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.get_mut(&id) {
            let record = &mut entry.record;
            match stream {
                StreamKind::Stdout => record.stdout.push_str(text),
                StreamKind::Stderr => record.stderr.push_str(text),
            }
            record.output_bytes += text.len();
            record.last_activity = Utc::now();
        }
    }

    pub(crate) fn mark_truncated(&self, id: RecordId) {
        if let Some(entry) = self.inner.write().entries.get_mut(&id) {
            entry.record.truncated = true;
        }
    }

    /// Refresh the activity clock without output
    pub fn touch(&self, id: RecordId) {
        if let Some(entry) = self.inner.write().entries.get_mut(&id) {
            entry.record.last_activity = Utc::now();
        }
    }

    /// The watcher reaped the process and is draining its pipes
    pub(crate) fn mark_reaped(&self, id: RecordId) {
        if let Some(entry) = self.inner.write().entries.get_mut(&id) {
            entry.record.reaped = true;
        }
    }

    /// Move a record to its final state; false if the transition is not forward
    pub(crate) fn finalize(&self, id: RecordId, outcome: Outcome) -> bool {
        self.finalize_with(id, outcome, false)
    }

    /// Finalize from outside the watcher; reaped records are left to their watcher
    pub(crate) fn finalize_unreaped(&self, id: RecordId, outcome: Outcome) -> bool {
        self.finalize_with(id, outcome, true)
    }

    fn finalize_with(&self, id: RecordId, outcome: Outcome, skip_reaped: bool) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return false;
        };

        if skip_reaped && entry.record.reaped {
            debug!(id = %id, "Record already reaped, leaving it to its watcher");
            return false;
        }

        let next = outcome.status();
        if !entry.record.status.can_transition_to(next) {
            debug!(
                id = %id,
                from = %entry.record.status,
                to = %next,
                "Ignoring non-forward status transition"
            );
            return false;
        }

        let record = &mut entry.record;
        match outcome {
            Outcome::Exited(code) => record.exit_code = Some(code),
            Outcome::Killed(signal) => record.signal = signal,
            Outcome::Failed(message) => record.error = Some(message),
        }
        record.status = next;
        record.ended_at = Some(Utc::now());
        entry.handle = None;

        debug!(id = %id, pid = ?entry.record.pid, status = %next, "Finalized process");
        true
    }

    /// Flag a running record as zombie
    pub(crate) fn mark_zombie(&self, id: RecordId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return false;
        };

        if entry.record.status != ProcessStatus::Running || entry.record.reaped {
            return false;
        }

        warn!(id = %id, pid = ?entry.record.pid, command = %entry.record.command, "Process marked zombie");
        entry.record.status = ProcessStatus::Zombie;
        entry.handle = None;
        true
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, id: RecordId) -> Option<ProcessRecord> {
        self.inner.read().entries.get(&id).map(|e| e.record.clone())
    }

    /// Most recent record for a pid
    pub fn find_by_pid(&self, pid: u32) -> Option<ProcessRecord> {
        let inner = self.inner.read();
        let id = inner.by_pid.get(&pid)?;
        inner.entries.get(id).map(|e| e.record.clone())
    }

    /// All records, oldest first
    pub fn list(&self) -> Vec<ProcessRecord> {
        self.inner
            .read()
            .entries
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    /// Records still running or flagged zombie
    pub fn active(&self) -> Vec<ProcessRecord> {
        self.filter(|r| r.status.is_active())
    }

    pub fn running(&self) -> Vec<ProcessRecord> {
        self.filter(|r| r.status == ProcessStatus::Running)
    }

    /// Active records whose process its watcher has not reaped yet
    pub fn unreaped(&self) -> Vec<ProcessRecord> {
        self.filter(|r| r.status.is_active() && !r.reaped)
    }

    pub fn filter<F>(&self, predicate: F) -> Vec<ProcessRecord>
    where
        F: Fn(&ProcessRecord) -> bool,
    {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| predicate(&e.record))
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running_count(&self) -> usize {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| e.record.status == ProcessStatus::Running)
            .count()
    }

    /// Record count per status
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.inner.read().entries.values() {
            *counts.entry(entry.record.status.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Wait until a record leaves the running state, then return it
    pub async fn wait(&self, id: RecordId) -> Option<ProcessRecord> {
        let rx = {
            let inner = self.inner.read();
            let entry = inner.entries.get(&id)?;
            entry.handle.as_ref().map(|h| h.exited.subscribe())
        };

        if let Some(mut rx) = rx {
            // The sender is dropped on finalize, which ends the loop
            while rx.changed().await.is_ok() {}
        }

        self.get(id)
    }

    // ========================================================================
    // Pruning
    // ========================================================================

    pub fn remove(&self, id: RecordId) -> Option<ProcessRecord> {
        let mut inner = self.inner.write();
        let entry = inner.entries.remove(&id)?;
        if let Some(pid) = entry.record.pid {
            if inner.by_pid.get(&pid) == Some(&id) {
                inner.by_pid.remove(&pid);
            }
        }
        Some(entry.record)
    }

    /// Drop the oldest terminal records beyond `keep`; returns how many were removed
    pub fn prune_finished(&self, keep: usize) -> usize {
        let mut inner = self.inner.write();
        let finished: Vec<RecordId> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.record.status.is_terminal())
            .map(|(id, _)| *id)
            .collect();

        let excess = finished.len().saturating_sub(keep);
        for id in &finished[..excess] {
            if let Some(entry) = inner.entries.remove(id) {
                if let Some(pid) = entry.record.pid {
                    if inner.by_pid.get(&pid) == Some(id) {
                        inner.by_pid.remove(&pid);
                    }
                }
            }
        }

        if excess > 0 {
            debug!(pruned = excess, kept = keep, "Pruned finished process records");
        }
        excess
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
