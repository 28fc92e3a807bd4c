//! Interactive shell sessions
//!
//! A session is a long-lived shell reading commands from a piped stdin. A
//! response is considered complete once the shell has been silent for the
//! quiescence window (or the response cap elapsed). This is a heuristic: slow
//! commands that pause longer than the window are cut short.

use crate::env::EnvironmentManager;
use crate::events::EngineEvent;
use crate::executor::ProcessExecutor;
use crate::output::{OutputChunk, StreamKind};
use crate::record::RecordId;
use crate::registry::ProcessRegistry;
use crate::shell::ShellLocator;
use crate::supervisor::LifecycleSupervisor;
use chrono::{DateTime, Utc};
use hive_foundation::{Error, EventBus, Result, SessionSettings, ShellType};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Extra time given to the watcher after the kill
const CLOSE_SETTLE: Duration = Duration::from_secs(1);

/// Options for a new session
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub shell: Option<ShellType>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

/// Output collected for one input line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionOutput {
    pub stdout: String,
    pub stderr: String,
    /// The shell exited while we were reading
    pub closed: bool,
}

/// Snapshot of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub record_id: RecordId,
    pub pid: u32,
    pub shell: ShellType,
    pub path: PathBuf,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub history: Vec<String>,
    pub running: bool,
}

struct SessionIo {
    stdin: ChildStdin,
    output: mpsc::UnboundedReceiver<OutputChunk>,
    closed: bool,
}

struct ShellSession {
    id: String,
    record_id: RecordId,
    pid: u32,
    shell: ShellType,
    path: PathBuf,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    io: tokio::sync::Mutex<SessionIo>,
    history: Mutex<Vec<String>>,
    task: Mutex<Option<JoinHandle<Result<crate::output::ProcessResult>>>>,
}

/// Owns every open session
pub struct SessionManager {
    executor: ProcessExecutor,
    locator: Arc<ShellLocator>,
    env: Arc<EnvironmentManager>,
    registry: Arc<ProcessRegistry>,
    supervisor: Arc<LifecycleSupervisor>,
    bus: Arc<EventBus<EngineEvent>>,
    settings: RwLock<SessionSettings>,
    sessions: RwLock<HashMap<String, Arc<ShellSession>>>,
}

impl SessionManager {
    pub fn new(
        executor: ProcessExecutor,
        locator: Arc<ShellLocator>,
        env: Arc<EnvironmentManager>,
        registry: Arc<ProcessRegistry>,
        supervisor: Arc<LifecycleSupervisor>,
        bus: Arc<EventBus<EngineEvent>>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            executor,
            locator,
            env,
            registry,
            supervisor,
            bus,
            settings: RwLock::new(settings),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Change the response-complete silence window
    pub fn set_quiescence(&self, window: Duration) {
        self.settings.write().quiescence_ms = window.as_millis() as u64;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn a shell and keep it open
    pub fn create_session(&self, options: SessionOptions) -> Result<SessionInfo> {
        let shell = self.locator.resolve(options.shell)?;
        let process = self
            .executor
            .launch_session(&shell, options.cwd.as_deref(), &options.env)?;

        let cwd = self
            .registry
            .get(process.id)
            .map(|r| r.cwd)
            .unwrap_or_default();

        let session = Arc::new(ShellSession {
            id: uuid::Uuid::new_v4().to_string(),
            record_id: process.id,
            pid: process.pid,
            shell: shell.shell_type,
            path: shell.path,
            cwd,
            env: self.env.resolve(&options.env),
            created_at: Utc::now(),
            io: tokio::sync::Mutex::new(SessionIo {
                stdin: process.stdin,
                output: process.output,
                closed: false,
            }),
            history: Mutex::new(Vec::new()),
            task: Mutex::new(Some(process.task)),
        });

        info!(session = %session.id, pid = session.pid, shell = %session.shell, "Session created");
        self.bus.publish(EngineEvent::SessionCreated {
            session_id: session.id.clone(),
            pid: session.pid,
            shell: session.shell,
        });

        let info = self.info(&session);
        self.sessions.write().insert(session.id.clone(), session);
        Ok(info)
    }

    /// Write one line and collect the response until the shell goes quiet
    pub async fn send_to_session(&self, session_id: &str, input: &str) -> Result<SessionOutput> {
        let session = self.session(session_id)?;
        let (quiescence, max_response) = {
            let settings = self.settings.read();
            (
                Duration::from_millis(settings.quiescence_ms),
                Duration::from_millis(settings.max_response_ms),
            )
        };

        let mut io = session.io.lock().await;
        if io.closed {
            return Err(Error::Session(format!("session {} has exited", session_id)));
        }

        // Output nobody asked for belongs to no response
        loop {
            match io.output.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    io.closed = true;
                    return Err(Error::Session(format!("session {} has exited", session_id)));
                }
            }
        }

        let line_ending = if session.shell == ShellType::Cmd { "\r\n" } else { "\n" };
        let line = format!("{}{}", input, line_ending);
        let written = async {
            io.stdin.write_all(line.as_bytes()).await?;
            io.stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            io.closed = true;
            return Err(Error::Session(format!("failed to write to session {}: {}", session_id, e)));
        }

        session.history.lock().push(input.to_string());
        self.registry.touch(session.record_id);
        debug!(session = %session_id, input = %input, "Sent input to session");

        let mut output = SessionOutput::default();
        let hard_stop = Instant::now() + max_response;

        loop {
            let left = hard_stop.saturating_duration_since(Instant::now());
            if left.is_zero() {
                warn!(session = %session_id, "Response cap reached while output was still flowing");
                break;
            }

            match tokio::time::timeout(quiescence.min(left), io.output.recv()).await {
                Ok(Some(chunk)) => match chunk.stream {
                    StreamKind::Stdout => output.stdout.push_str(&chunk.text),
                    StreamKind::Stderr => output.stderr.push_str(&chunk.text),
                },
                Ok(None) => {
                    io.closed = true;
                    output.closed = true;
                    break;
                }
                // silence for the whole window
                Err(_) => break,
            }
        }

        Ok(output)
    }

    /// Terminate a session and forget it
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .remove(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        self.shutdown(&session).await;

        info!(session = %session_id, pid = session.pid, "Session closed");
        self.bus.publish(EngineEvent::SessionClosed {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Close every session; returns how many were closed
    pub async fn close_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        let mut closed = 0;
        for id in ids {
            if self.close_session(&id).await.is_ok() {
                closed += 1;
            }
        }
        closed
    }

    async fn shutdown(&self, session: &ShellSession) {
        let grace = Duration::from_millis(self.settings.read().close_grace_ms);

        // EOF on stdin ends most shells on its own
        {
            let mut io = session.io.lock().await;
            if !io.closed {
                let _ = io.stdin.shutdown().await;
                io.closed = true;
            }
        }

        if let Err(e) = self.supervisor.graceful_kill(session.pid, grace).await {
            warn!(session = %session.id, pid = session.pid, error = %e, "Failed to stop session shell");
        }

        let task = session.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(grace + CLOSE_SETTLE, task).await.is_err() {
                warn!(session = %session.id, "Session watcher did not finish in time");
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn session(&self, session_id: &str) -> Result<Arc<ShellSession>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    fn info(&self, session: &ShellSession) -> SessionInfo {
        SessionInfo {
            id: session.id.clone(),
            record_id: session.record_id,
            pid: session.pid,
            shell: session.shell,
            path: session.path.clone(),
            cwd: session.cwd.clone(),
            env: session.env.clone(),
            created_at: session.created_at,
            history: session.history.lock().clone(),
            running: self
                .registry
                .get(session.record_id)
                .is_some_and(|r| r.is_running()),
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionInfo> {
        self.session(session_id).ok().map(|s| self.info(&s))
    }

    /// All sessions, oldest first
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<ShellSession>> = self.sessions.read().values().cloned().collect();
        let mut infos: Vec<SessionInfo> = sessions.iter().map(|s| self.info(s)).collect();
        infos.sort_by_key(|i| i.created_at);
        infos
    }

    pub fn history(&self, session_id: &str) -> Result<Vec<String>> {
        Ok(self.session(session_id)?.history.lock().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
