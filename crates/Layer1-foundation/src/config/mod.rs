//! Config - engine settings
//!
//! - `engine.rs` - `EngineConfig` with global/project merge and `HIVE_*` overrides

mod engine;

pub use engine::{
    EngineConfig, EnvSettings, ProfileName, SessionSettings, SupervisorSettings, TimeoutOverride,
    TimeoutSettings, ENGINE_CONFIG_FILE, ENGINE_CONFIG_TOML,
};
