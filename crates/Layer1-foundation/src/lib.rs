//! # hive-foundation
//!
//! Foundation layer for the Hive execution engine:
//! - Error: one error enum shared by every layer
//! - Event: typed event bus (broadcast + listeners + bounded history)
//! - Config: engine configuration with global/project merge
//! - Storage: JSON/TOML config store
//! - Registry: shell catalogue (executables, args, fallback order)
//! - Env detection: host OS/arch/hostname
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Orchestration layer (agents, tools)                    │
//! │                     │ approved command + cwd            │
//! │                     ▼                                   │
//! │  hive-exec Engine                                       │
//! │  ├── EnvironmentManager ── ShellLocator                 │
//! │  ├── ProcessExecutor ──── ProcessRegistry               │
//! │  ├── LifecycleSupervisor ─ PlatformKiller               │
//! │  └── SessionManager                                     │
//! │                     │                                   │
//! │                     ▼                                   │
//! │          EventBus<EngineEvent> (this crate)             │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod env_detect;
pub mod error;
pub mod event;
pub mod registry;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    EngineConfig, EnvSettings, ProfileName, SessionSettings, SupervisorSettings,
    TimeoutOverride, TimeoutSettings, ENGINE_CONFIG_FILE, ENGINE_CONFIG_TOML,
};

// ============================================================================
// Event
// ============================================================================
pub use event::{
    BusEvent, EventBus, EventBusConfig, EventListener, EventRecord, EventSeverity,
    ListenerId,
};

// ============================================================================
// Registry (shell catalogue)
// ============================================================================
pub use registry::{Dialect, ShellType};

// ============================================================================
// Storage
// ============================================================================
pub use storage::ConfigStore;

// ============================================================================
// Environment Detection
// ============================================================================
pub use env_detect::{HostInfo, OsType};
