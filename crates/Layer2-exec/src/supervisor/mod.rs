//! Lifecycle supervisor - reconciles the registry with OS reality
//!
//! ## Architecture
//!
//! ```text
//! interval tick ──► perform_cleanup()
//!                     ├─ detect_zombies()   running records that are dead, stuck or past deadline
//!                     ├─ detect_orphans()   running records whose parent pid is gone
//!                     └─ graceful_kill()    SIGTERM → grace → SIGKILL, one at a time
//! ```
//!
//! Remediation failures never propagate; they are collected into
//! `CleanupStats::errors`.

mod killer;
pub(crate) mod shutdown;

pub use killer::{native_killer, signal_name, KillSignal, PlatformKiller};
#[cfg(unix)]
pub use killer::UnixKiller;
#[cfg(windows)]
pub use killer::WindowsKiller;
pub use shutdown::wait_for_termination;

use crate::events::EngineEvent;
use crate::record::{Outcome, ProcessRecord, RecordId};
use crate::registry::ProcessRegistry;
use crate::state::{ProcessKind, ProcessStatus};
use chrono::{DateTime, Utc};
use hive_foundation::{Error, EventBus, Result, SupervisorSettings};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Liveness poll interval while waiting for a signalled process
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for a SIGKILL to take effect
const KILL_SETTLE: Duration = Duration::from_millis(500);

/// Why a record was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZombieReason {
    /// OS probe says the process is gone
    NoResponse,
    /// Registered parent pid is gone
    Orphaned,
    /// No output for longer than the stuck threshold
    Stuck,
    /// Still running past its deadline plus grace
    Timeout,
}

impl ZombieReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZombieReason::NoResponse => "no_response",
            ZombieReason::Orphaned => "orphaned",
            ZombieReason::Stuck => "stuck",
            ZombieReason::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ZombieReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZombieRecord {
    pub id: RecordId,
    pub pid: u32,
    pub command: String,
    pub detected_at: DateTime<Utc>,
    pub reason: ZombieReason,
}

/// Result of one cleanup pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub zombies_killed: usize,
    pub orphans_killed: usize,
    /// Processes that actually needed a signal
    pub processes_terminated: usize,
    /// Finished records dropped past the retention cap
    pub records_pruned: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl CleanupStats {
    pub fn is_empty(&self) -> bool {
        self.zombies_killed == 0
            && self.orphans_killed == 0
            && self.processes_terminated == 0
            && self.records_pruned == 0
            && self.errors.is_empty()
    }
}

/// Zombie bookkeeping
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZombieStats {
    /// Records currently in the zombie state
    pub active: usize,
    pub total_detected: u64,
    pub total_killed: u64,
    /// Most recent detections, oldest first
    pub history: Vec<ZombieRecord>,
}

/// What `graceful_kill` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    AlreadyDead,
    /// Exited within the grace period after SIGTERM
    Terminated,
    /// Needed SIGKILL
    Killed,
}

impl KillOutcome {
    /// Signal that ended the process, if we sent one
    pub fn signal(&self) -> Option<KillSignal> {
        match self {
            KillOutcome::AlreadyDead => None,
            KillOutcome::Terminated => Some(KillSignal::Term),
            KillOutcome::Killed => Some(KillSignal::Kill),
        }
    }
}

#[derive(Default)]
struct Tally {
    total_detected: u64,
    total_killed: u64,
    history: VecDeque<ZombieRecord>,
}

/// Resets the scan flag when a pass ends, however it ends
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Periodic zombie/orphan detection and remediation
pub struct LifecycleSupervisor {
    registry: Arc<ProcessRegistry>,
    killer: Arc<dyn PlatformKiller>,
    bus: Arc<EventBus<EngineEvent>>,
    settings: SupervisorSettings,
    scanning: AtomicBool,
    tally: Mutex<Tally>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl LifecycleSupervisor {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        killer: Arc<dyn PlatformKiller>,
        bus: Arc<EventBus<EngineEvent>>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            registry,
            killer,
            bus,
            settings,
            scanning: AtomicBool::new(false),
            tally: Mutex::new(Tally::default()),
            stop_tx: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn killer(&self) -> &Arc<dyn PlatformKiller> {
        &self.killer
    }

    fn grace_period(&self) -> Duration {
        Duration::from_millis(self.settings.grace_period_ms)
    }

    // ========================================================================
    // Probing / killing
    // ========================================================================

    /// Zero-signal probe; permission denied counts as alive
    pub fn is_process_running(&self, pid: u32) -> bool {
        self.killer.is_alive(pid)
    }

    /// Signal a process tree directly
    pub fn kill_process_tree(&self, pid: u32, signal: KillSignal) -> bool {
        self.killer.kill_tree(pid, signal)
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL; idempotent on dead processes
    pub async fn graceful_kill(&self, pid: u32, grace: Duration) -> Result<KillOutcome> {
        if !self.killer.is_alive(pid) {
            return Ok(KillOutcome::AlreadyDead);
        }

        self.killer.kill_tree(pid, KillSignal::Term);
        if self.wait_for_exit(pid, grace).await {
            debug!(pid, "Process exited after SIGTERM");
            return Ok(KillOutcome::Terminated);
        }

        warn!(pid, grace_ms = grace.as_millis() as u64, "Grace period expired, sending SIGKILL");
        self.killer.kill_tree(pid, KillSignal::Kill);
        if self.wait_for_exit(pid, KILL_SETTLE).await {
            return Ok(KillOutcome::Killed);
        }

        Err(Error::signal(pid, "process survived SIGKILL"))
    }

    async fn wait_for_exit(&self, pid: u32, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.killer.is_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Gracefully kill every active record; returns how many were ended
    pub async fn kill_all_children(&self) -> usize {
        let grace = self.grace_period();
        let targets: Vec<(RecordId, u32)> = self
            .registry
            .unreaped()
            .into_iter()
            .filter_map(|r| Some((r.id, r.pid?)))
            .collect();

        if targets.is_empty() {
            return 0;
        }
        info!(count = targets.len(), "Killing all child processes");

        let kills = targets.iter().map(|(_, pid)| self.graceful_kill(*pid, grace));
        let outcomes = futures::future::join_all(kills).await;

        let mut ended = 0;
        for ((id, pid), outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => {
                    let signal = outcome.signal().map(|s| s.as_str().to_string());
                    self.registry.finalize_unreaped(id, Outcome::Killed(signal));
                    ended += 1;
                }
                Err(e) => error!(pid, error = %e, "Failed to kill child process"),
            }
        }
        ended
    }

    // ========================================================================
    // Detection
    // ========================================================================

    /// Flag running records that are dead, stuck or past their deadline
    pub fn detect_zombies(&self) -> Vec<ZombieRecord> {
        let now = Utc::now();
        let stuck_after = Duration::from_millis(self.settings.stuck_threshold_ms);
        let grace = chrono::Duration::milliseconds(self.settings.grace_period_ms as i64);

        let found: Vec<ZombieRecord> = self
            .registry
            .running()
            .into_iter()
            // a reaped record is being drained and finalized by its watcher
            .filter(|record| !record.reaped)
            .filter_map(|record| {
                let pid = record.pid?;
                // records with a deadline are bounded by their timer and the timeout check
                let may_stall = record.deadline.is_none() && record.kind != ProcessKind::Session;
                let reason = if !self.killer.is_alive(pid) {
                    ZombieReason::NoResponse
                } else if record.deadline.is_some_and(|d| now > d + grace) {
                    ZombieReason::Timeout
                } else if may_stall && record.idle(now) > stuck_after {
                    ZombieReason::Stuck
                } else {
                    return None;
                };
                Some(zombie(&record, pid, reason, now))
            })
            .filter(|z| self.registry.mark_zombie(z.id))
            .collect();

        self.note_detected(&found);
        if !found.is_empty() {
            warn!(count = found.len(), "Zombie processes detected");
            self.bus.publish(EngineEvent::ZombiesDetected {
                zombies: found.clone(),
            });
        }
        found
    }

    /// Flag running records whose registered parent is gone
    pub fn detect_orphans(&self) -> Vec<ZombieRecord> {
        let now = Utc::now();

        let found: Vec<ZombieRecord> = self
            .registry
            .running()
            .into_iter()
            .filter(|record| !record.reaped)
            .filter_map(|record| {
                let pid = record.pid?;
                let parent = record.parent_pid?;
                if self.killer.is_alive(parent) {
                    return None;
                }
                Some((zombie(&record, pid, ZombieReason::Orphaned, now), parent))
            })
            .filter(|(z, _)| self.registry.mark_zombie(z.id))
            .map(|(z, parent_pid)| {
                warn!(pid = z.pid, parent_pid, "Orphaned process detected");
                self.bus.publish(EngineEvent::OrphanedProcess {
                    id: z.id,
                    pid: z.pid,
                    parent_pid,
                });
                z
            })
            .collect();

        self.note_detected(&found);
        found
    }

    fn note_detected(&self, found: &[ZombieRecord]) {
        if found.is_empty() {
            return;
        }
        let mut tally = self.tally.lock();
        tally.total_detected += found.len() as u64;
        for z in found {
            tally.history.push_back(z.clone());
        }
        while tally.history.len() > self.settings.zombie_history {
            tally.history.pop_front();
        }
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// One detection + remediation pass; empty stats if a pass is already running
    pub async fn perform_cleanup(&self) -> CleanupStats {
        if self.scanning.swap(true, Ordering::SeqCst) {
            debug!("Cleanup already in progress, skipping");
            return CleanupStats::default();
        }
        let _guard = ScanGuard(&self.scanning);

        let started = Instant::now();
        let mut stats = CleanupStats::default();

        let zombies = self.detect_zombies();
        let seen: HashSet<RecordId> = zombies.iter().map(|z| z.id).collect();
        let orphans: Vec<ZombieRecord> = self
            .detect_orphans()
            .into_iter()
            .filter(|o| !seen.contains(&o.id))
            .collect();

        let grace = self.grace_period();
        for target in zombies.iter().chain(orphans.iter()) {
            match self.graceful_kill(target.pid, grace).await {
                Ok(outcome) => {
                    let signal = outcome.signal().map(|s| s.as_str().to_string());
                    if !self.registry.finalize_unreaped(target.id, Outcome::Killed(signal)) {
                        debug!(pid = target.pid, "Process exited on its own during cleanup");
                        continue;
                    }

                    if target.reason == ZombieReason::Orphaned {
                        stats.orphans_killed += 1;
                    } else {
                        stats.zombies_killed += 1;
                    }
                    if outcome != KillOutcome::AlreadyDead {
                        stats.processes_terminated += 1;
                    }
                }
                Err(e) => {
                    error!(pid = target.pid, reason = %target.reason, error = %e, "Failed to remediate zombie");
                    stats.errors.push(format!("pid {}: {}", target.pid, e));
                }
            }
        }

        stats.records_pruned = self
            .registry
            .prune_finished(self.settings.max_finished_records);
        stats.duration_ms = started.elapsed().as_millis() as u64;
        self.tally.lock().total_killed += (stats.zombies_killed + stats.orphans_killed) as u64;

        if !stats.is_empty() {
            info!(
                zombies = stats.zombies_killed,
                orphans = stats.orphans_killed,
                pruned = stats.records_pruned,
                errors = stats.errors.len(),
                "Cleanup completed"
            );
        }
        self.bus.publish(EngineEvent::CleanupCompleted {
            stats: stats.clone(),
        });

        stats
    }

    pub fn zombie_stats(&self) -> ZombieStats {
        let tally = self.tally.lock();
        ZombieStats {
            active: self
                .registry
                .filter(|r| r.status == ProcessStatus::Zombie)
                .len(),
            total_detected: tally.total_detected,
            total_killed: tally.total_killed,
            history: tally.history.iter().cloned().collect(),
        }
    }

    // ========================================================================
    // Periodic loop
    // ========================================================================

    /// Start the periodic scan; no-op if already running
    pub fn start(self: &Arc<Self>) -> bool {
        let mut slot = self.stop_tx.lock();
        if slot.is_some() {
            return false;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        *slot = Some(stop_tx);

        let period = Duration::from_millis(self.settings.interval_ms.max(1));
        let weak: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(supervisor) = weak.upgrade() else { break };
                        supervisor.perform_cleanup().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Supervisor loop stopped");
        });

        info!(interval_ms = period.as_millis() as u64, "Supervisor started");
        true
    }

    pub fn stop(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.lock().is_some()
    }
}

impl Drop for LifecycleSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn zombie(record: &ProcessRecord, pid: u32, reason: ZombieReason, now: DateTime<Utc>) -> ZombieRecord {
    ZombieRecord {
        id: record.id,
        pid,
        command: record.command.clone(),
        detected_at: now,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewRecord;
    use std::collections::HashSet;
    use std::path::PathBuf;

    /// Killer over a fake process table
    #[derive(Default)]
    struct FakeKiller {
        alive: Mutex<HashSet<u32>>,
        /// pids that ignore SIGTERM
        stubborn: Mutex<HashSet<u32>>,
        /// pids that survive everything
        immortal: Mutex<HashSet<u32>>,
        signals: Mutex<Vec<(u32, KillSignal)>>,
    }

    impl FakeKiller {
        fn with_alive(pids: &[u32]) -> Arc<Self> {
            let killer = Self::default();
            killer.alive.lock().extend(pids);
            Arc::new(killer)
        }
    }

    impl PlatformKiller for FakeKiller {
        fn name(&self) -> &str {
            "fake"
        }

        fn kill_tree(&self, pid: u32, signal: KillSignal) -> bool {
            self.signals.lock().push((pid, signal));
            if self.immortal.lock().contains(&pid) {
                return true;
            }
            if signal == KillSignal::Term && self.stubborn.lock().contains(&pid) {
                return true;
            }
            self.alive.lock().remove(&pid)
        }

        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().contains(&pid)
        }
    }

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            grace_period_ms: 100,
            stuck_threshold_ms: 60_000,
            ..Default::default()
        }
    }

    fn setup(killer: Arc<FakeKiller>) -> (Arc<ProcessRegistry>, LifecycleSupervisor) {
        let registry = Arc::new(ProcessRegistry::new());
        let supervisor = LifecycleSupervisor::new(
            Arc::clone(&registry),
            killer,
            Arc::new(EventBus::new()),
            settings(),
        );
        (registry, supervisor)
    }

    fn register(registry: &ProcessRegistry, pid: u32, timeout: Option<Duration>) -> RecordId {
        registry.register(NewRecord {
            pid: Some(pid),
            command: format!("cmd-{}", pid),
            args: Vec::new(),
            kind: ProcessKind::Background,
            cwd: PathBuf::from("."),
            timeout,
            parent_pid: None,
        })
    }

    #[test]
    fn test_dead_process_is_zombie() {
        let killer = FakeKiller::with_alive(&[10]);
        let (registry, supervisor) = setup(killer);
        let alive = register(&registry, 10, None);
        let dead = register(&registry, 11, None);

        let zombies = supervisor.detect_zombies();
        assert_eq!(zombies.len(), 1);
        assert_eq!(zombies[0].id, dead);
        assert_eq!(zombies[0].reason, ZombieReason::NoResponse);

        assert_eq!(registry.get(dead).unwrap().status, ProcessStatus::Zombie);
        assert!(registry.get(alive).unwrap().is_running());

        // already flagged, not reported twice
        assert!(supervisor.detect_zombies().is_empty());
        assert_eq!(supervisor.zombie_stats().total_detected, 1);
    }

    #[test]
    fn test_orphan_detection() {
        let killer = FakeKiller::with_alive(&[20]);
        let (registry, supervisor) = setup(killer);
        let id = registry.register(NewRecord {
            pid: Some(20),
            command: "child".into(),
            args: Vec::new(),
            kind: ProcessKind::Spawn,
            cwd: PathBuf::from("."),
            timeout: None,
            parent_pid: Some(19),
        });

        let orphans = supervisor.detect_orphans();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, id);
        assert_eq!(orphans[0].reason, ZombieReason::Orphaned);
    }

    #[tokio::test]
    async fn test_cleanup_kills_and_finalizes() {
        let killer = FakeKiller::with_alive(&[30, 31]);
        killer.stubborn.lock().insert(31);
        let (registry, supervisor) = setup(Arc::clone(&killer));

        let dead = register(&registry, 29, None);
        let orphan = registry.register(NewRecord {
            pid: Some(30),
            command: "orphan".into(),
            args: Vec::new(),
            kind: ProcessKind::Spawn,
            cwd: PathBuf::from("."),
            timeout: None,
            parent_pid: Some(1234),
        });
        let keeper = register(&registry, 31, None);

        let stats = supervisor.perform_cleanup().await;
        assert_eq!(stats.zombies_killed, 1);
        assert_eq!(stats.orphans_killed, 1);
        assert_eq!(stats.processes_terminated, 1);
        assert!(stats.errors.is_empty());

        let dead = registry.get(dead).unwrap();
        assert_eq!(dead.status, ProcessStatus::Killed);
        assert!(dead.signal.is_none());

        let orphan = registry.get(orphan).unwrap();
        assert_eq!(orphan.signal.as_deref(), Some("SIGTERM"));

        assert!(registry.get(keeper).unwrap().is_running());
        assert_eq!(registry.active().len(), 1);
        assert_eq!(supervisor.zombie_stats().total_killed, 2);
    }

    #[tokio::test]
    async fn test_graceful_kill_escalates() {
        let killer = FakeKiller::with_alive(&[40]);
        killer.stubborn.lock().insert(40);
        let (_registry, supervisor) = setup(Arc::clone(&killer));

        let outcome = supervisor
            .graceful_kill(40, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(outcome, KillOutcome::Killed);
        assert_eq!(
            *killer.signals.lock(),
            vec![(40, KillSignal::Term), (40, KillSignal::Kill)]
        );

        // idempotent once dead
        let outcome = supervisor
            .graceful_kill(40, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(outcome, KillOutcome::AlreadyDead);
    }

    #[tokio::test]
    async fn test_failed_kill_is_collected_not_raised() {
        let killer = FakeKiller::with_alive(&[50]);
        killer.immortal.lock().insert(50);
        let (registry, supervisor) = setup(Arc::clone(&killer));

        // deadline long past, so it counts as a timeout zombie
        let id = register(&registry, 50, Some(Duration::from_millis(1)));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stats = supervisor.perform_cleanup().await;
        assert_eq!(stats.zombies_killed, 0);
        assert_eq!(stats.errors.len(), 1);

        // remains zombie when the kill itself fails
        assert_eq!(registry.get(id).unwrap().status, ProcessStatus::Zombie);
        assert_eq!(supervisor.zombie_stats().active, 1);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let killer = FakeKiller::with_alive(&[]);
        let (_registry, supervisor) = setup(killer);
        let supervisor = Arc::new(supervisor);

        assert!(supervisor.start());
        assert!(!supervisor.start());
        assert!(supervisor.is_running());

        supervisor.stop();
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_reaped_record_is_left_to_its_watcher() {
        let killer = FakeKiller::with_alive(&[]);
        let (registry, supervisor) = setup(killer);
        let id = register(&registry, 60, Some(Duration::from_secs(30)));
        registry.mark_reaped(id);

        let stats = supervisor.perform_cleanup().await;
        assert!(stats.is_empty());
        assert!(registry.get(id).unwrap().is_running());

        registry.finalize(id, Outcome::Exited(0));
        assert_eq!(registry.get(id).unwrap().status, ProcessStatus::Completed);
    }

    #[tokio::test]
    async fn test_cleanup_prunes_finished_records() {
        let killer = FakeKiller::with_alive(&[70]);
        let registry = Arc::new(ProcessRegistry::new());
        let supervisor = LifecycleSupervisor::new(
            Arc::clone(&registry),
            killer,
            Arc::new(EventBus::new()),
            SupervisorSettings {
                max_finished_records: 3,
                ..settings()
            },
        );

        let running = register(&registry, 70, None);
        for pid in 71..79 {
            let id = register(&registry, pid, None);
            registry.mark_reaped(id);
            registry.finalize(id, Outcome::Exited(0));
        }

        let stats = supervisor.perform_cleanup().await;
        assert_eq!(stats.records_pruned, 5);
        assert_eq!(registry.len(), 4);
        assert!(registry.get(running).unwrap().is_running());
        assert!(registry.find_by_pid(78).is_some());
    }
}
