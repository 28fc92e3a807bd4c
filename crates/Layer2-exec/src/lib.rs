//! # hive-exec
//!
//! Process execution and lifecycle supervision for Hive.
//!
//! ## Features
//!
//! - Shell resolution with fallback and a TTL cache
//! - One-shot, streaming, piped, detached and background execution
//! - Per-command timeouts with process-tree kill
//! - Environment layering, profiles, secret redaction, dotenv files
//! - Zombie/orphan detection and periodic cleanup
//! - Interactive shell sessions
//! - Typed events for every lifecycle transition
//!
//! ```no_run
//! # async fn demo() -> hive_foundation::Result<()> {
//! use hive_exec::{Engine, ExecOptions};
//!
//! let engine = Engine::builder().build()?;
//! let result = engine.exec("echo hello", ExecOptions::default()).await?;
//! assert_eq!(result.stdout().trim(), "hello");
//! engine.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod env;
pub mod events;
pub mod executor;
pub mod output;
mod pattern;
pub mod record;
pub mod registry;
pub mod session;
pub mod shell;
pub mod state;
pub mod supervisor;

// Engine
pub use engine::{Engine, EngineBuilder, SystemInfo};

// Execution
pub use executor::{parse_progress, ExecOptions, OutputStream, ProcessExecutor, Progress, TimeoutPolicy};
pub use output::{OutputChunk, ProcessResult, StderrAnalysis, StreamKind};

// Process table
pub use record::{ProcessRecord, RecordId};
pub use registry::ProcessRegistry;
pub use state::{ProcessKind, ProcessStatus};

// Shells
pub use shell::{ResolvedShell, ShellInfo, ShellLocator, ShellTranslator};

// Environment
pub use env::{is_secret_name, EnvironmentManager, DEFAULT_SECRET_PATTERNS, REDACTED};

// Supervision
pub use supervisor::{
    native_killer, signal_name, CleanupStats, KillOutcome, KillSignal, LifecycleSupervisor,
    PlatformKiller, ZombieReason, ZombieRecord, ZombieStats,
};

// Sessions
pub use session::{SessionInfo, SessionManager, SessionOptions, SessionOutput};

// Events
pub use events::{EngineEvent, EnvChange};

// Foundation types callers need alongside the engine
pub use hive_foundation::{EngineConfig, Error, Result, ShellType};
