//! Process executor - exec / streaming / pipe / spawn primitives
//!
//! ## Architecture
//!
//! ```text
//! exec(cmd) ─► plan (cwd, shell, env, timeout)
//!           ─► spawn ─► registry.register ─► `spawn` event
//!                 ├─ stdout reader ─┐
//!                 ├─ stderr reader ─┴─► raw chunks ─► Capture ─► registry / bus / consumer
//!                 ├─ timer: warning at ratio, tree kill at deadline
//!                 └─ watcher: child.wait() ─► finalize record ─► ProcessResult
//! ```
//!
//! Every launch registers exactly one record before any output event and
//! finalizes it exactly once. Each child runs in its own process group on Unix.

mod capture;
mod progress;
mod timeout;

pub use progress::{parse_progress, Progress};
pub use timeout::TimeoutPolicy;

use crate::env::EnvironmentManager;
use crate::events::EngineEvent;
use crate::output::{OutputChunk, ProcessResult, StreamKind};
use crate::record::{NewRecord, Outcome, RecordId};
use crate::registry::ProcessRegistry;
use crate::shell::{ResolvedShell, ShellLocator};
use crate::state::ProcessKind;
use crate::supervisor::{signal_name, KillSignal, PlatformKiller};
use capture::{Capture, Forward};
use futures::Stream;
use hive_foundation::{EngineConfig, Error, EventBus, Result, ShellType};
use progress::LineSplitter;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pipe read size
const READ_BUF_SIZE: usize = 8192;

/// How long to keep reading pipes after the process exited
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Streaming consumer channel capacity
const STREAM_CAPACITY: usize = 256;

// ============================================================================
// Options
// ============================================================================

/// Per-call execution options
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory (engine default when None)
    pub cwd: Option<PathBuf>,

    /// Extra variables for this call only
    pub env: BTreeMap<String, String>,

    /// Explicit timeout; zero counts as not given
    pub timeout: Option<Duration>,

    /// Shell override
    pub shell: Option<ShellType>,

    /// Report stderr as stdout
    pub merge_stderr: bool,

    /// Capture cap (engine default when None)
    pub max_output_bytes: Option<usize>,

    /// Registered parent pid (orphan detection)
    pub parent_pid: Option<u32>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_shell(mut self, shell: ShellType) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn merge_stderr(mut self) -> Self {
        self.merge_stderr = true;
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    pub fn with_parent_pid(mut self, pid: u32) -> Self {
        self.parent_pid = Some(pid);
        self
    }
}

// ============================================================================
// Streaming handle
// ============================================================================

/// Lazy, finite sequence of chunks from one streaming exec
///
/// Ends (`recv` → None) once the process has exited and its output is drained.
pub struct OutputStream {
    id: RecordId,
    pid: u32,
    rx: mpsc::Receiver<OutputChunk>,
    task: JoinHandle<Result<ProcessResult>>,
}

impl OutputStream {
    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub async fn recv(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }

    /// Stop consuming and wait for the final result
    pub async fn finish(self) -> Result<ProcessResult> {
        drop(self.rx);
        join(self.task).await
    }
}

impl Stream for OutputStream {
    type Item = OutputChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A launched interactive shell
pub(crate) struct SessionProcess {
    pub id: RecordId,
    pub pid: u32,
    pub stdin: ChildStdin,
    pub output: mpsc::UnboundedReceiver<OutputChunk>,
    pub task: JoinHandle<Result<ProcessResult>>,
}

async fn join(task: JoinHandle<Result<ProcessResult>>) -> Result<ProcessResult> {
    task.await
        .map_err(|e| Error::Internal(format!("process watcher failed: {}", e)))?
}

// ============================================================================
// Launch plan
// ============================================================================

struct LaunchPlan {
    /// Command as recorded and reported
    command: String,
    program: PathBuf,
    args: Vec<String>,
    /// Arguments recorded for direct spawns
    record_args: Vec<String>,
    /// Dialect-specific raw command (cmd.exe quoting)
    raw_command: Option<String>,
    kind: ProcessKind,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
    merge_stderr: bool,
    max_output: usize,
    parent_pid: Option<u32>,
    piped_stdin: bool,
}

struct Launched {
    id: RecordId,
    pid: u32,
    stdin: Option<ChildStdin>,
    task: JoinHandle<Result<ProcessResult>>,
}

// ============================================================================
// ProcessExecutor
// ============================================================================

struct ExecutorInner {
    default_cwd: Option<PathBuf>,
    max_output_bytes: usize,
    registry: Arc<ProcessRegistry>,
    locator: Arc<ShellLocator>,
    env: Arc<EnvironmentManager>,
    bus: Arc<EventBus<EngineEvent>>,
    killer: Arc<dyn PlatformKiller>,
    timeouts: TimeoutPolicy,
    closed: AtomicBool,
}

/// Spawns processes and owns their timeouts and output capture
#[derive(Clone)]
pub struct ProcessExecutor {
    inner: Arc<ExecutorInner>,
}

impl ProcessExecutor {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<ProcessRegistry>,
        locator: Arc<ShellLocator>,
        env: Arc<EnvironmentManager>,
        bus: Arc<EventBus<EngineEvent>>,
        killer: Arc<dyn PlatformKiller>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                default_cwd: config.cwd.clone(),
                max_output_bytes: config.max_output_bytes,
                registry,
                locator,
                env,
                bus,
                killer,
                timeouts: TimeoutPolicy::new(&config.timeouts),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.inner.timeouts
    }

    /// Register a per-command-pattern timeout
    pub fn set_timeout_override(&self, pattern: impl Into<String>, timeout: Duration) {
        self.inner.timeouts.set_override(pattern, timeout);
    }

    /// Refuse every further launch
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Public primitives
    // ========================================================================

    /// Run a shell command to completion
    ///
    /// Rejects with `Error::Timeout` if the command outlives its timeout; a
    /// non-zero exit is a normal result.
    pub async fn exec(&self, command: &str, options: ExecOptions) -> Result<ProcessResult> {
        let plan = self.shell_plan(command, &options, ProcessKind::Exec)?;
        let launched = self.launch(plan, Forward::None)?;
        join(launched.task).await
    }

    /// Run a shell command, yielding chunks as they arrive
    pub async fn exec_streaming(&self, command: &str, options: ExecOptions) -> Result<OutputStream> {
        let plan = self.shell_plan(command, &options, ProcessKind::Streaming)?;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let launched = self.launch(plan, Forward::Bounded(tx))?;

        Ok(OutputStream {
            id: launched.id,
            pid: launched.pid,
            rx,
            task: launched.task,
        })
    }

    /// Streaming exec that reports parsed progress lines
    pub async fn exec_with_progress<F>(
        &self,
        command: &str,
        options: ExecOptions,
        mut on_progress: F,
    ) -> Result<ProcessResult>
    where
        F: FnMut(Progress) + Send,
    {
        let mut stream = self.exec_streaming(command, options).await?;
        let mut stdout_lines = LineSplitter::default();
        let mut stderr_lines = LineSplitter::default();

        while let Some(chunk) = stream.recv().await {
            let splitter = match chunk.stream {
                StreamKind::Stdout => &mut stdout_lines,
                StreamKind::Stderr => &mut stderr_lines,
            };
            for line in splitter.push(&chunk.text) {
                if let Some(progress) = parse_progress(&line) {
                    on_progress(progress);
                }
            }
        }

        let tails = [stdout_lines.finish(), stderr_lines.finish()];
        for progress in tails.iter().flatten().filter_map(|l| parse_progress(l)) {
            on_progress(progress);
        }

        stream.finish().await
    }

    /// Join commands with the shell's own pipe operator inside one invocation
    pub async fn pipe<S: AsRef<str>>(&self, commands: &[S], options: ExecOptions) -> Result<ProcessResult> {
        let parts: Vec<&str> = commands
            .iter()
            .map(|c| c.as_ref().trim())
            .filter(|c| !c.is_empty())
            .collect();
        if parts.is_empty() {
            return Err(Error::InvalidInput("pipe needs at least one command".into()));
        }

        let shell = self.inner.locator.resolve(options.shell)?;
        let separator = format!(" {} ", shell.shell_type.pipe_operator());
        let joined = parts.join(separator.as_str());

        self.exec(&joined, ExecOptions {
            shell: Some(shell.shell_type),
            ..options
        })
        .await
    }

    /// Start a program directly (no shell, no timeout); returns its pid
    pub async fn spawn(&self, program: &str, args: &[String], options: ExecOptions) -> Result<u32> {
        self.ensure_open()?;
        if program.trim().is_empty() {
            return Err(Error::InvalidInput("program must not be empty".into()));
        }
        let cwd = self.resolve_cwd(options.cwd.as_deref())?;

        let command = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let plan = LaunchPlan {
            command,
            program: PathBuf::from(program),
            args: args.to_vec(),
            record_args: args.to_vec(),
            raw_command: None,
            kind: ProcessKind::Spawn,
            cwd,
            env: self.inner.env.resolve(&options.env),
            timeout: None,
            merge_stderr: options.merge_stderr,
            max_output: options.max_output_bytes.unwrap_or(self.inner.max_output_bytes),
            parent_pid: options.parent_pid,
            piped_stdin: false,
        };

        Ok(self.launch(plan, Forward::None)?.pid)
    }

    /// Start a shell command without a timeout; returns its pid
    pub async fn background(&self, command: &str, options: ExecOptions) -> Result<u32> {
        let plan = self.shell_plan(command, &options, ProcessKind::Background)?;
        Ok(self.launch(plan, Forward::None)?.pid)
    }

    /// `exec` that returns stdout and turns a non-zero exit into an error
    pub async fn run(&self, command: &str, options: ExecOptions) -> Result<String> {
        let result = self.exec(command, options).await?;
        if result.success() {
            return Ok(result.stdout().to_string());
        }

        Err(Error::NonZeroExit {
            command: command.to_string(),
            exit_code: result.exit_code().unwrap_or(-1),
            stderr: result.stderr().to_string(),
        })
    }

    /// Start a long-lived interactive shell
    pub(crate) fn launch_session(
        &self,
        shell: &ResolvedShell,
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
    ) -> Result<SessionProcess> {
        self.ensure_open()?;
        let cwd = self.resolve_cwd(cwd)?;

        let plan = LaunchPlan {
            command: format!("{} (session)", shell.shell_type),
            program: shell.path.clone(),
            args: shell
                .shell_type
                .session_args()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            record_args: Vec::new(),
            raw_command: None,
            kind: ProcessKind::Session,
            cwd,
            env: self.inner.env.resolve(env),
            timeout: None,
            merge_stderr: false,
            max_output: self.inner.max_output_bytes,
            parent_pid: None,
            piped_stdin: true,
        };

        let (tx, output) = mpsc::unbounded_channel();
        let launched = self.launch(plan, Forward::Unbounded(tx))?;
        let stdin = launched
            .stdin
            .ok_or_else(|| Error::Session("shell stdin is not available".into()))?;

        Ok(SessionProcess {
            id: launched.id,
            pid: launched.pid,
            stdin,
            output,
            task: launched.task,
        })
    }

    // ========================================================================
    // Planning
    // ========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Destroyed);
        }
        Ok(())
    }

    fn resolve_cwd(&self, requested: Option<&Path>) -> Result<PathBuf> {
        let cwd = match requested.or(self.inner.default_cwd.as_deref()) {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()?,
        };

        if !cwd.is_dir() {
            return Err(Error::InvalidWorkingDir(cwd));
        }
        Ok(cwd)
    }

    fn shell_plan(&self, command: &str, options: &ExecOptions, kind: ProcessKind) -> Result<LaunchPlan> {
        self.ensure_open()?;
        if command.trim().is_empty() {
            return Err(Error::InvalidInput("command must not be empty".into()));
        }

        let cwd = self.resolve_cwd(options.cwd.as_deref())?;
        let shell = self.inner.locator.resolve(options.shell)?;

        let timeout = match kind {
            ProcessKind::Exec | ProcessKind::Streaming => {
                Some(self.inner.timeouts.effective(command, options.timeout))
            }
            ProcessKind::Spawn | ProcessKind::Background | ProcessKind::Session => None,
        };

        let mut args: Vec<String> = shell
            .shell_type
            .exec_args()
            .iter()
            .map(|s| s.to_string())
            .collect();

        // cmd.exe does its own parsing of everything after /C
        let raw_command = if cfg!(windows) && shell.shell_type == ShellType::Cmd {
            Some(command.to_string())
        } else {
            args.push(command.to_string());
            None
        };

        Ok(LaunchPlan {
            command: command.to_string(),
            program: shell.path,
            args,
            record_args: Vec::new(),
            raw_command,
            kind,
            cwd,
            env: self.inner.env.resolve(&options.env),
            timeout,
            merge_stderr: options.merge_stderr,
            max_output: options.max_output_bytes.unwrap_or(self.inner.max_output_bytes),
            parent_pid: options.parent_pid,
            piped_stdin: false,
        })
    }

    // ========================================================================
    // Launch
    // ========================================================================

    fn launch(&self, plan: LaunchPlan, forward: Forward) -> Result<Launched> {
        let inner = &self.inner;

        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .current_dir(&plan.cwd)
            .env_clear()
            .envs(&plan.env)
            .stdin(if plan.piped_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        if let Some(raw) = &plan.raw_command {
            cmd.raw_arg(raw);
        }
        #[cfg(not(windows))]
        let _ = &plan.raw_command;

        #[cfg(unix)]
        cmd.process_group(0);

        let new_record = |pid: Option<u32>| NewRecord {
            pid,
            command: plan.command.clone(),
            args: plan.record_args.clone(),
            kind: plan.kind,
            cwd: plan.cwd.clone(),
            timeout: plan.timeout,
            parent_pid: plan.parent_pid,
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let id = inner.registry.register_failed(new_record(None), e.to_string());
                warn!(command = %plan.command, error = %e, "Failed to spawn process");
                inner.bus.publish(EngineEvent::Error {
                    id: Some(id),
                    pid: None,
                    command: plan.command.clone(),
                    message: e.to_string(),
                });
                return Err(Error::spawn(plan.command, e));
            }
        };

        let Some(pid) = child.id() else {
            let id = inner
                .registry
                .register_failed(new_record(None), "process exited before it was registered");
            inner.bus.publish(EngineEvent::Error {
                id: Some(id),
                pid: None,
                command: plan.command.clone(),
                message: "process exited before it was registered".into(),
            });
            return Err(Error::Internal(format!("'{}' has no pid", plan.command)));
        };

        let id = inner.registry.register(new_record(Some(pid)));
        debug!(id = %id, pid, kind = %plan.kind, command = %plan.command, "Spawned process");
        inner.bus.publish(EngineEvent::Spawned {
            id,
            pid,
            command: plan.command.clone(),
            kind: plan.kind,
        });

        // Readers start only after the record exists
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let readers = [
            spawn_reader(child.stdout.take(), StreamKind::Stdout, raw_tx.clone()),
            spawn_reader(child.stderr.take(), StreamKind::Stderr, raw_tx),
        ];
        let stdin = child.stdin.take();

        let timed_out = Arc::new(AtomicBool::new(false));
        let (expired_tx, expired_rx) = oneshot::channel();
        let timer = plan.timeout.map(|timeout| {
            spawn_timer(TimerPlan {
                id,
                pid,
                command: plan.command.clone(),
                timeout,
                warn_at: inner.timeouts.warning_at(timeout),
                bus: Arc::clone(&inner.bus),
                killer: Arc::clone(&inner.killer),
                timed_out: Arc::clone(&timed_out),
                expired: expired_tx,
            })
        });

        let mut capture = Capture::new(
            id,
            pid,
            Arc::clone(&inner.registry),
            Arc::clone(&inner.bus),
            plan.max_output,
            plan.merge_stderr,
            forward,
        );
        if plan.kind == ProcessKind::Session {
            capture = capture.forward_past_limit();
        }

        let registry = Arc::clone(&inner.registry);
        let bus = Arc::clone(&inner.bus);
        let command = plan.command;
        let timeout = plan.timeout;
        let started = Instant::now();

        let task = tokio::spawn(async move {
            let mut raw_rx = raw_rx;
            let mut expired_rx = expired_rx;
            let mut deadline_armed = timer.is_some();

            let status = loop {
                tokio::select! {
                    Some((stream, bytes)) = raw_rx.recv() => {
                        capture.accept(stream, &bytes).await;
                    }
                    status = child.wait() => break status,
                    expired = &mut expired_rx, if deadline_armed => {
                        deadline_armed = false;
                        if expired.is_ok() {
                            // group kill already sent; make sure the direct child goes too
                            let _ = child.start_kill();
                        }
                    }
                }
            };
            registry.mark_reaped(id);

            if let Some(timer) = timer {
                timer.abort();
            }

            // Pick up whatever is still in the pipes
            let drain_until = tokio::time::Instant::now() + DRAIN_TIMEOUT;
            while let Ok(Some((stream, bytes))) =
                tokio::time::timeout_at(drain_until, raw_rx.recv()).await
            {
                capture.accept(stream, &bytes).await;
            }
            for reader in readers {
                reader.abort();
            }
            let captured = capture.finish().await;
            let duration = started.elapsed();

            let status = match status {
                Ok(status) => status,
                Err(e) => {
                    warn!(id = %id, pid, error = %e, "Failed to wait for process");
                    registry.finalize(id, Outcome::Failed(e.to_string()));
                    bus.publish(EngineEvent::Error {
                        id: Some(id),
                        pid: Some(pid),
                        command: command.clone(),
                        message: e.to_string(),
                    });
                    return Err(Error::Io(e));
                }
            };

            if timed_out.load(Ordering::SeqCst) {
                let timeout_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                let signal = KillSignal::Kill.as_str().to_string();
                registry.finalize(id, Outcome::Killed(Some(signal.clone())));
                bus.publish(EngineEvent::Timeout {
                    id,
                    pid,
                    command: command.clone(),
                    timeout_ms,
                });
                bus.publish(EngineEvent::Close {
                    id,
                    pid,
                    exit_code: None,
                    signal: Some(signal),
                    duration_ms: duration.as_millis() as u64,
                });
                return Err(Error::Timeout {
                    command,
                    pid,
                    timeout_ms,
                });
            }

            let (exit_code, signal) = exit_details(&status);
            let outcome = match exit_code {
                Some(code) => Outcome::Exited(code),
                None => Outcome::Killed(signal.clone()),
            };
            registry.finalize(id, outcome);

            debug!(id = %id, pid, exit_code = ?exit_code, signal = ?signal, "Process exited");
            bus.publish(EngineEvent::Close {
                id,
                pid,
                exit_code,
                signal: signal.clone(),
                duration_ms: duration.as_millis() as u64,
            });

            Ok(ProcessResult::new(
                Some(pid),
                command,
                exit_code,
                signal,
                captured,
                duration,
            ))
        });

        Ok(Launched {
            id,
            pid,
            stdin,
            task,
        })
    }
}

/// Exit code, or the terminating signal's name
fn exit_details(status: &std::process::ExitStatus) -> (Option<i32>, Option<String>) {
    if let Some(code) = status.code() {
        return (Some(code), None);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (None, status.signal().map(signal_name))
    }
    #[cfg(not(unix))]
    {
        (None, None)
    }
}

fn spawn_reader<R>(
    pipe: Option<R>,
    stream: StreamKind,
    tx: mpsc::UnboundedSender<(StreamKind, Vec<u8>)>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(stream = %stream, error = %e, "Pipe read failed");
                    break;
                }
            }
        }
    })
}

struct TimerPlan {
    id: RecordId,
    pid: u32,
    command: String,
    timeout: Duration,
    warn_at: Duration,
    bus: Arc<EventBus<EngineEvent>>,
    killer: Arc<dyn PlatformKiller>,
    timed_out: Arc<AtomicBool>,
    expired: oneshot::Sender<()>,
}

fn spawn_timer(timer: TimerPlan) -> JoinHandle<()> {
    tokio::spawn(async move {
        let timeout_ms = timer.timeout.as_millis() as u64;

        if !timer.warn_at.is_zero() && timer.warn_at < timer.timeout {
            tokio::time::sleep(timer.warn_at).await;
            warn!(pid = timer.pid, command = %timer.command, timeout_ms, "Command approaching timeout");
            timer.bus.publish(EngineEvent::TimeoutWarning {
                id: timer.id,
                pid: timer.pid,
                command: timer.command.clone(),
                elapsed_ms: timer.warn_at.as_millis() as u64,
                timeout_ms,
            });
            tokio::time::sleep(timer.timeout - timer.warn_at).await;
        } else {
            tokio::time::sleep(timer.timeout).await;
        }

        timer.timed_out.store(true, Ordering::SeqCst);
        info!(pid = timer.pid, command = %timer.command, timeout_ms, "Timeout reached, killing process tree");
        timer.killer.kill_tree(timer.pid, KillSignal::Kill);
        let _ = timer.expired.send(());
    })
}
