//! Engine - one instance owning every table and component
//!
//! Build with [`Engine::builder`]; share the returned `Arc<Engine>`. Several
//! engines can coexist (tests build one each).

use crate::env::EnvironmentManager;
use crate::events::EngineEvent;
use crate::executor::{ExecOptions, OutputStream, ProcessExecutor, Progress};
use crate::output::ProcessResult;
use crate::record::{Outcome, ProcessRecord};
use crate::registry::ProcessRegistry;
use crate::session::SessionManager;
use crate::shell::{ShellInfo, ShellLocator, ShellTranslator};
use crate::supervisor::{
    self, native_killer, CleanupStats, KillOutcome, KillSignal, LifecycleSupervisor,
    PlatformKiller, ZombieStats,
};
use chrono::{DateTime, Utc};
use hive_foundation::{
    EngineConfig, Error, EventBus, EventListener, HostInfo, ListenerId, ProfileName, Result,
    ShellType,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Diagnostics snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub hostname: Option<String>,
    pub engine_pid: u32,
    pub preferred_shell: ShellType,
    pub preferred_shell_path: Option<PathBuf>,
    pub available_shells: Vec<ShellType>,
    pub profile: ProfileName,
    pub running_processes: usize,
    pub total_processes: usize,
    pub active_sessions: usize,
    pub supervisor_running: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
}

// ============================================================================
// Builder
// ============================================================================

/// Engine builder
pub struct EngineBuilder {
    config: EngineConfig,
    killer: Option<Arc<dyn PlatformKiller>>,
    host_env: Option<Vec<(String, String)>>,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            killer: None,
            host_env: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the OS killer (tests)
    pub fn killer(mut self, killer: Arc<dyn PlatformKiller>) -> Self {
        self.killer = Some(killer);
        self
    }

    /// Use this instead of the real host environment
    pub fn host_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.host_env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Validate, wire components and (inside a runtime) start the supervisor
    pub fn build(self) -> Result<Arc<Engine>> {
        let config = self.config;
        config.validate()?;

        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ProcessRegistry::new());

        let locator = Arc::new(ShellLocator::new(
            config.initial_shell(),
            config.shell_cache_ttl(),
            config.auto_fallback,
            Arc::clone(&bus),
        ));

        let env = Arc::new(match self.host_env {
            Some(vars) => EnvironmentManager::with_host(&config.env, vars, Arc::clone(&bus)),
            None => EnvironmentManager::new(&config.env, Arc::clone(&bus)),
        });

        let killer: Arc<dyn PlatformKiller> = self.killer.unwrap_or_else(|| Arc::from(native_killer()));

        let executor = ProcessExecutor::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&locator),
            Arc::clone(&env),
            Arc::clone(&bus),
            Arc::clone(&killer),
        );

        let supervisor = Arc::new(LifecycleSupervisor::new(
            Arc::clone(&registry),
            killer,
            Arc::clone(&bus),
            config.supervisor.clone(),
        ));

        let sessions = SessionManager::new(
            executor.clone(),
            Arc::clone(&locator),
            Arc::clone(&env),
            Arc::clone(&registry),
            Arc::clone(&supervisor),
            Arc::clone(&bus),
            config.session.clone(),
        );

        let engine = Arc::new(Engine {
            host: HostInfo::detect(),
            started_at: Utc::now(),
            translator: ShellTranslator::new(),
            destroyed: AtomicBool::new(false),
            config,
            bus,
            registry,
            locator,
            env,
            executor,
            supervisor,
            sessions,
        });

        if tokio::runtime::Handle::try_current().is_ok() {
            if engine.config.supervisor.enabled {
                engine.supervisor.start();
            }
            if engine.config.supervisor.handle_signals {
                engine.install_shutdown_hooks();
            }
        } else {
            warn!("No tokio runtime; supervisor loop and signal hooks not started");
        }

        info!(shell = %engine.locator.preferred(), "Engine ready");
        Ok(engine)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Process execution and lifecycle engine
pub struct Engine {
    config: EngineConfig,
    host: HostInfo,
    started_at: DateTime<Utc>,
    bus: Arc<EventBus<EngineEvent>>,
    registry: Arc<ProcessRegistry>,
    locator: Arc<ShellLocator>,
    translator: ShellTranslator,
    env: Arc<EnvironmentManager>,
    executor: ProcessExecutor,
    supervisor: Arc<LifecycleSupervisor>,
    sessions: SessionManager,
    destroyed: AtomicBool,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::Destroyed);
        }
        Ok(())
    }

    // ========================================================================
    // Execution
    // ========================================================================

    pub async fn exec(&self, command: &str, options: ExecOptions) -> Result<ProcessResult> {
        self.ensure_alive()?;
        self.executor.exec(command, options).await
    }

    pub async fn exec_streaming(&self, command: &str, options: ExecOptions) -> Result<OutputStream> {
        self.ensure_alive()?;
        self.executor.exec_streaming(command, options).await
    }

    pub async fn exec_with_progress<F>(
        &self,
        command: &str,
        options: ExecOptions,
        on_progress: F,
    ) -> Result<ProcessResult>
    where
        F: FnMut(Progress) + Send,
    {
        self.ensure_alive()?;
        self.executor
            .exec_with_progress(command, options, on_progress)
            .await
    }

    pub async fn pipe<S: AsRef<str>>(&self, commands: &[S], options: ExecOptions) -> Result<ProcessResult> {
        self.ensure_alive()?;
        self.executor.pipe(commands, options).await
    }

    pub async fn spawn(&self, program: &str, args: &[String], options: ExecOptions) -> Result<u32> {
        self.ensure_alive()?;
        self.executor.spawn(program, args, options).await
    }

    pub async fn background(&self, command: &str, options: ExecOptions) -> Result<u32> {
        self.ensure_alive()?;
        self.executor.background(command, options).await
    }

    pub async fn run(&self, command: &str, options: ExecOptions) -> Result<String> {
        self.ensure_alive()?;
        self.executor.run(command, options).await
    }

    pub fn set_timeout_override(&self, pattern: impl Into<String>, timeout: Duration) {
        self.executor.set_timeout_override(pattern, timeout);
    }

    pub fn executor(&self) -> &ProcessExecutor {
        &self.executor
    }

    // ========================================================================
    // Shells
    // ========================================================================

    pub fn translate(&self, command: &str, from: ShellType, to: ShellType) -> String {
        self.translator.translate(command, from, to)
    }

    pub fn available_shells(&self) -> Vec<ShellType> {
        self.locator.list_available()
    }

    pub fn preferred_shell(&self) -> ShellType {
        self.locator.preferred()
    }

    pub fn set_preferred_shell(&self, shell: ShellType) -> bool {
        self.locator.set_preferred(shell)
    }

    pub async fn shell_info(&self, shell: ShellType) -> ShellInfo {
        self.locator.info(shell).await
    }

    pub fn shells(&self) -> &ShellLocator {
        &self.locator
    }

    // ========================================================================
    // Environment / sessions
    // ========================================================================

    pub fn env(&self) -> &EnvironmentManager {
        &self.env
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    // ========================================================================
    // Processes
    // ========================================================================

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<LifecycleSupervisor> {
        &self.supervisor
    }

    pub fn is_process_running(&self, pid: u32) -> bool {
        self.supervisor.is_process_running(pid)
    }

    /// Signal a process tree by pid
    pub fn kill(&self, pid: u32, signal: KillSignal) -> Result<()> {
        if !self.supervisor.is_process_running(pid) {
            return Err(Error::ProcessNotFound(pid));
        }
        if !self.supervisor.kill_process_tree(pid, signal) {
            return Err(Error::signal(pid, format!("{} was not delivered", signal)));
        }
        Ok(())
    }

    /// SIGTERM, grace period, SIGKILL
    pub async fn kill_graceful(&self, pid: u32) -> Result<KillOutcome> {
        let grace = Duration::from_millis(self.config.supervisor.grace_period_ms);
        self.supervisor.graceful_kill(pid, grace).await
    }

    pub fn list_processes(&self) -> Vec<ProcessRecord> {
        self.registry.list()
    }

    /// Most recent record for a pid
    pub fn get_process(&self, pid: u32) -> Option<ProcessRecord> {
        self.registry.find_by_pid(pid)
    }

    pub async fn perform_cleanup(&self) -> CleanupStats {
        self.supervisor.perform_cleanup().await
    }

    pub fn zombie_stats(&self) -> ZombieStats {
        self.supervisor.zombie_stats()
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn events(&self) -> &Arc<EventBus<EngineEvent>> {
        &self.bus
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener<EngineEvent>>) -> ListenerId {
        self.bus.subscribe(listener)
    }

    pub fn receiver(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.receiver()
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn system_info(&self) -> SystemInfo {
        let preferred = self.locator.preferred();
        let now = Utc::now();

        SystemInfo {
            os: self.host.os.to_string(),
            arch: self.host.arch.to_string(),
            hostname: self.host.hostname.clone(),
            engine_pid: self.host.pid,
            preferred_shell: preferred,
            preferred_shell_path: self.locator.locate(preferred),
            available_shells: self.locator.list_available(),
            profile: self.env.profile(),
            running_processes: self.registry.running_count(),
            total_processes: self.registry.len(),
            active_sessions: self.sessions.len(),
            supervisor_running: self.supervisor.is_running(),
            started_at: self.started_at,
            uptime_ms: (now - self.started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// Human-readable status dump
    pub fn status_report(&self) -> String {
        let info = self.system_info();
        let zombies = self.zombie_stats();
        let mut out = String::new();

        let _ = writeln!(out, "Hive engine (pid {}) on {} / {}", info.engine_pid, info.os, info.arch);
        let _ = writeln!(
            out,
            "Shell: {} ({})",
            info.preferred_shell,
            info.preferred_shell_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "not found".into())
        );
        let available: Vec<&str> = info.available_shells.iter().map(|s| s.as_str()).collect();
        let _ = writeln!(out, "Available: {}", available.join(", "));
        let _ = writeln!(out, "Profile: {}", info.profile);
        let _ = writeln!(
            out,
            "Processes: {} running / {} total, {} sessions",
            info.running_processes, info.total_processes, info.active_sessions
        );

        let counts = self.registry.status_counts();
        if !counts.is_empty() {
            let parts: Vec<String> = counts.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            let _ = writeln!(out, "  by status: {}", parts.join(" "));
        }

        let _ = writeln!(
            out,
            "Supervisor: {}, zombies active={} detected={} killed={}",
            if info.supervisor_running { "running" } else { "stopped" },
            zombies.active,
            zombies.total_detected,
            zombies.total_killed
        );
        let _ = writeln!(out, "Uptime: {:.1}s", info.uptime_ms as f64 / 1000.0);

        for record in self.registry.active() {
            let _ = writeln!(out, "  {}", record.describe());
        }

        out
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Graceful teardown: close sessions, gracefully kill children (once)
    pub async fn destroy(&self) {
        self.destroy_with_reason("destroy").await;
    }

    async fn destroy_with_reason(&self, reason: &str) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(reason, "Engine shutting down");
        self.bus.publish(EngineEvent::Shutdown {
            reason: reason.to_string(),
        });

        self.executor.close();
        self.supervisor.stop();

        let sessions = self.sessions.close_all().await;
        let killed = self.supervisor.kill_all_children().await;
        info!(sessions, killed, "Engine destroyed");

        self.bus.publish(EngineEvent::Destroyed);
    }

    /// Immediate teardown: SIGKILL every active process tree (once)
    pub fn destroy_sync(&self) {
        self.destroy_sync_with_reason("destroy_sync");
    }

    fn destroy_sync_with_reason(&self, reason: &str) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(reason, "Engine destroyed immediately");
        self.bus.publish(EngineEvent::Shutdown {
            reason: reason.to_string(),
        });

        self.executor.close();
        self.supervisor.stop();

        for record in self.registry.active() {
            if let Some(pid) = record.pid {
                self.supervisor.kill_process_tree(pid, KillSignal::Kill);
            }
            self.registry.finalize(
                record.id,
                Outcome::Killed(Some(KillSignal::Kill.as_str().to_string())),
            );
        }

        self.bus.publish(EngineEvent::Destroyed);
    }

    /// Termination signals run `destroy` then exit; panics run `destroy_sync`
    fn install_shutdown_hooks(self: &Arc<Self>) {
        supervisor::shutdown::install_panic_hook(self, |engine: &Engine| {
            engine.destroy_sync_with_reason("panic")
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let signal = supervisor::wait_for_termination().await;
            if let Some(engine) = weak.upgrade() {
                engine.destroy_with_reason(signal).await;
            }
            let code = match signal {
                "SIGHUP" => 129,
                "SIGQUIT" => 131,
                "SIGTERM" => 143,
                _ => 130,
            };
            std::process::exit(code);
        });
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy_sync_with_reason("dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewRecord;
    use crate::state::{ProcessKind, ProcessStatus};
    use hive_foundation::BusEvent;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingKiller {
        killed: Mutex<Vec<(u32, KillSignal)>>,
    }

    impl PlatformKiller for RecordingKiller {
        fn name(&self) -> &str {
            "recording"
        }

        fn kill_tree(&self, pid: u32, signal: KillSignal) -> bool {
            self.killed.lock().push((pid, signal));
            true
        }

        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    fn fake_record(engine: &Engine, pid: u32) -> crate::record::RecordId {
        engine.registry.register(NewRecord {
            pid: Some(pid),
            command: "sleep 100".into(),
            args: Vec::new(),
            kind: ProcessKind::Background,
            cwd: PathBuf::from("."),
            timeout: None,
            parent_pid: None,
        })
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.timeouts.default_ms = 0;

        let err = Engine::builder().config(config).build().err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_build_without_runtime_leaves_supervisor_stopped() {
        let engine = Engine::builder()
            .killer(Arc::new(RecordingKiller::default()))
            .build()
            .unwrap();
        assert!(!engine.supervisor().is_running());
        assert!(!engine.is_destroyed());
    }

    #[test]
    fn test_destroy_sync_kills_active_records() {
        let killer = Arc::new(RecordingKiller::default());
        let engine = Engine::builder().killer(killer.clone()).build().unwrap();
        let mut events = engine.receiver();

        let id = fake_record(&engine, 4242);
        engine.destroy_sync();
        engine.destroy_sync();

        assert_eq!(*killer.killed.lock(), vec![(4242, KillSignal::Kill)]);
        let record = engine.registry().get(id).unwrap();
        assert_eq!(record.status, ProcessStatus::Killed);
        assert_eq!(record.signal.as_deref(), Some("SIGKILL"));

        let names: Vec<&'static str> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["shutdown", "destroyed"]);
    }

    #[test]
    fn test_kill_unknown_pid() {
        let engine = Engine::builder()
            .killer(Arc::new(RecordingKiller::default()))
            .build()
            .unwrap();

        assert!(matches!(
            engine.kill(99_999, KillSignal::Term),
            Err(Error::ProcessNotFound(99_999))
        ));
    }

    #[test]
    fn test_translate_and_system_info() {
        let engine = Engine::builder()
            .killer(Arc::new(RecordingKiller::default()))
            .build()
            .unwrap();

        assert_eq!(engine.translate("dir /b", ShellType::Cmd, ShellType::Bash), "ls -1");

        let info = engine.system_info();
        assert_eq!(info.engine_pid, std::process::id());
        assert_eq!(info.running_processes, 0);
        assert!(!info.supervisor_running);
    }
}
