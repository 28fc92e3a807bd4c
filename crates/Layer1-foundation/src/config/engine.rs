//! Engine Config - execution engine settings
//!
//! Loaded from the global store merged with the project store (project wins),
//! then `HIVE_*` environment overrides are applied.

use crate::registry::ShellType;
use crate::storage::ConfigStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Config file name
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

/// TOML variant of the config file, read after the JSON one
pub const ENGINE_CONFIG_TOML: &str = "engine.toml";

// ============================================================================
// Engine Config
// ============================================================================

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Shell used when nothing else is requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_shell: Option<ShellType>,

    /// Preferred shell (wins over `default_shell`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_shell: Option<ShellType>,

    /// Walk the fallback order when a shell is missing
    pub auto_fallback: bool,

    /// Default working directory (None = engine process cwd)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    pub timeouts: TimeoutSettings,

    pub env: EnvSettings,

    /// Shell lookup cache TTL
    pub shell_cache_ttl_ms: u64,

    pub supervisor: SupervisorSettings,

    /// Per-process capture cap (bytes, both streams together)
    pub max_output_bytes: usize,

    pub session: SessionSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_shell: None,
            preferred_shell: None,
            auto_fallback: true,
            cwd: None,
            timeouts: TimeoutSettings::default(),
            env: EnvSettings::default(),
            shell_cache_ttl_ms: 60_000,
            supervisor: SupervisorSettings::default(),
            max_output_bytes: 10 * 1024 * 1024,
            session: SessionSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Global + project merged load, then `HIVE_*` overrides
    pub fn load() -> Result<Self> {
        let mut stores = Vec::new();
        if let Ok(global) = ConfigStore::global() {
            stores.push(global);
        }
        if let Ok(project) = ConfigStore::current_project() {
            stores.push(project);
        }

        let mut config = Self::load_from(&stores)?;
        config.apply_env_overrides(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    /// Merge the config files of the given stores, later stores winning
    pub fn load_from(stores: &[ConfigStore]) -> Result<Self> {
        let mut merged = Value::Object(Default::default());

        for store in stores {
            for file in [ENGINE_CONFIG_FILE, ENGINE_CONFIG_TOML] {
                if let Some(layer) = store.load_optional::<Value>(file)? {
                    debug!(path = %store.file_path(file).display(), "Loaded engine config layer");
                    merge_values(&mut merged, layer);
                }
            }
        }

        serde_json::from_value(merged).map_err(|e| Error::Config(e.to_string()))
    }

    // ========================================================================
    // Environment overrides
    // ========================================================================

    /// Apply `HIVE_*` overrides; unparsable values are ignored with a warning
    pub fn apply_env_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let applied = match key.as_str() {
                "HIVE_SHELL" => value.parse::<ShellType>().ok().map(|shell| {
                    self.preferred_shell = Some(shell);
                }),
                "HIVE_AUTO_FALLBACK" => parse_bool(&value).map(|b| self.auto_fallback = b),
                "HIVE_DEFAULT_TIMEOUT_MS" => value
                    .parse()
                    .ok()
                    .map(|ms| self.timeouts.default_ms = ms),
                "HIVE_MAX_TIMEOUT_MS" => value.parse().ok().map(|ms| self.timeouts.max_ms = ms),
                "HIVE_MAX_OUTPUT_BYTES" => {
                    value.parse().ok().map(|bytes| self.max_output_bytes = bytes)
                }
                "HIVE_PROFILE" => value.parse().ok().map(|p| self.env.profile = p),
                "HIVE_CWD" => {
                    self.cwd = Some(PathBuf::from(&value));
                    Some(())
                }
                _ => continue,
            };

            if applied.is_none() {
                warn!(key = %key, value = %value, "Ignoring invalid config override");
            }
        }
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.timeouts.default_ms == 0 {
            return Err(Error::Config("timeouts.defaultMs must be > 0".into()));
        }
        if self.timeouts.max_ms < self.timeouts.default_ms {
            return Err(Error::Config(format!(
                "timeouts.maxMs ({}) is below timeouts.defaultMs ({})",
                self.timeouts.max_ms, self.timeouts.default_ms
            )));
        }
        if !(self.timeouts.warning_ratio > 0.0 && self.timeouts.warning_ratio < 1.0) {
            return Err(Error::Config(
                "timeouts.warningRatio must be between 0 and 1".into(),
            ));
        }
        if self.supervisor.interval_ms == 0 {
            return Err(Error::Config("supervisor.intervalMs must be > 0".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Shell to try first
    pub fn initial_shell(&self) -> ShellType {
        self.preferred_shell
            .or(self.default_shell)
            .unwrap_or_else(ShellType::default_for_os)
    }

    pub fn shell_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.shell_cache_ttl_ms)
    }
}

/// Deep-merge `overlay` into `base` (objects merge, everything else replaces)
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Timeouts
// ============================================================================

/// Timeout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutSettings {
    /// Used when a call gives no timeout and no override matches
    pub default_ms: u64,

    /// Upper clamp for every effective timeout
    pub max_ms: u64,

    /// Fraction of the timeout after which a warning event fires
    pub warning_ratio: f64,

    /// Per-command-pattern overrides, first match wins
    pub overrides: Vec<TimeoutOverride>,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            default_ms: 30_000,
            max_ms: 600_000,
            warning_ratio: 0.8,
            overrides: Vec::new(),
        }
    }
}

/// Timeout for commands matching a `*` wildcard pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutOverride {
    pub pattern: String,
    pub timeout_ms: u64,
}

// ============================================================================
// Environment
// ============================================================================

/// Named environment preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileName {
    #[default]
    Development,
    Testing,
    Staging,
    Production,
}

impl ProfileName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    pub fn all() -> [ProfileName; 4] {
        [
            Self::Development,
            Self::Testing,
            Self::Staging,
            Self::Production,
        ]
    }
}

impl std::fmt::Display for ProfileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(Error::InvalidInput(format!("Unknown profile: {}", other))),
        }
    }
}

/// Environment construction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvSettings {
    /// Start from the host environment
    pub inherit_env: bool,

    /// Added on top of inherited + profile variables
    pub additional_env: BTreeMap<String, String>,

    /// Names or `*` patterns always removed (case-insensitive)
    pub blocked_env_vars: Vec<String>,

    pub profile: ProfileName,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            inherit_env: true,
            additional_env: BTreeMap::new(),
            blocked_env_vars: Vec::new(),
            profile: ProfileName::Development,
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Lifecycle supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// Run the periodic scan
    pub enabled: bool,

    pub interval_ms: u64,

    /// Inactivity after which a deadline-less record counts as stuck
    pub stuck_threshold_ms: u64,

    /// SIGTERM → SIGKILL grace
    pub grace_period_ms: u64,

    /// Zombie records kept in history
    pub zombie_history: usize,

    /// Finished records kept in the registry, oldest pruned first
    pub max_finished_records: usize,

    /// Install SIGINT/SIGTERM/panic hooks when the supervisor starts
    pub handle_signals: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            stuck_threshold_ms: 60_000,
            grace_period_ms: 5_000,
            zombie_history: 100,
            max_finished_records: 200,
            handle_signals: false,
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Interactive session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Silence after which a response is considered complete
    pub quiescence_ms: u64,

    /// Upper bound for one response, even if output keeps flowing
    pub max_response_ms: u64,

    /// Grace given to a session shell on close
    pub close_grace_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            quiescence_ms: 2_000,
            max_response_ms: 30_000,
            close_grace_ms: 1_000,
        }
    }
}
