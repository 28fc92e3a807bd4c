//! Environment manager - the effective environment for every spawned process
//!
//! Layers, lowest to highest precedence:
//!
//! ```text
//! inherited host env  (snapshot taken once, only if inheritance is on)
//!   ∪ profile preset
//!   ∪ additional env  (configuration)
//!   ∪ managed overrides (set_var / dotenv import)
//!   − blocklist       (always last, case-insensitive, `*` wildcards)
//! ```

use crate::events::{EngineEvent, EnvChange};
use crate::pattern::wildcard_match;
use hive_foundation::{EnvSettings, Error, EventBus, ProfileName, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Replacement for redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Secret-bearing names blocked outside development and always redacted
pub const DEFAULT_SECRET_PATTERNS: &[&str] = &[
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "DATABASE_URL",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "NPM_TOKEN",
    "SSH_AUTH_SOCK",
    "*_KEY",
    "*SECRET*",
    "*TOKEN*",
    "*PASSWORD*",
    "*CREDENTIAL*",
];

fn profile_preset(profile: ProfileName) -> BTreeMap<String, String> {
    let node_env = match profile {
        ProfileName::Development => "development",
        ProfileName::Testing => "test",
        ProfileName::Staging => "staging",
        ProfileName::Production => "production",
    };

    let mut vars = BTreeMap::from([
        ("HIVE_PROFILE".to_string(), profile.as_str().to_string()),
        ("NODE_ENV".to_string(), node_env.to_string()),
    ]);
    match profile {
        ProfileName::Development => {
            vars.insert("RUST_BACKTRACE".into(), "1".into());
        }
        ProfileName::Testing => {
            vars.insert("CI".into(), "true".into());
        }
        ProfileName::Staging | ProfileName::Production => {}
    }
    vars
}

fn matches_any(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|p| wildcard_match(p, name, true))
}

/// Name matches one of the default secret families
pub fn is_secret_name(name: &str) -> bool {
    DEFAULT_SECRET_PATTERNS
        .iter()
        .any(|p| wildcard_match(p, name, true))
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('=') || key.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "Invalid environment variable name: {:?}",
            key
        )));
    }
    Ok(())
}

struct EnvState {
    profile: ProfileName,
    additional: BTreeMap<String, String>,
    overrides: BTreeMap<String, String>,
    /// Configured + user-added patterns
    blocked: Vec<String>,
    /// Cached result of the last rebuild
    effective: BTreeMap<String, String>,
}

impl EnvState {
    fn blocklist(&self) -> Vec<String> {
        let mut list = self.blocked.clone();
        if self.profile != ProfileName::Development {
            list.extend(DEFAULT_SECRET_PATTERNS.iter().map(|p| p.to_string()));
        }
        list
    }

    /// Union of every layer before the blocklist
    fn merged(&self, host: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = host.clone();
        env.extend(profile_preset(self.profile));
        env.extend(self.additional.clone());
        env.extend(self.overrides.clone());
        env
    }

    fn rebuild(&mut self, host: &BTreeMap<String, String>) {
        let blocklist = self.blocklist();
        let mut env = self.merged(host);
        env.retain(|k, _| !matches_any(&blocklist, k));
        self.effective = env;
    }
}

/// Per-engine environment tables
pub struct EnvironmentManager {
    inherit: bool,
    host: BTreeMap<String, String>,
    state: RwLock<EnvState>,
    bus: Arc<EventBus<EngineEvent>>,
}

impl EnvironmentManager {
    /// Snapshot the host environment (if inheriting) and build
    pub fn new(settings: &EnvSettings, bus: Arc<EventBus<EngineEvent>>) -> Self {
        Self::with_host(settings, std::env::vars(), bus)
    }

    /// Build over an explicit host environment
    pub fn with_host<I>(settings: &EnvSettings, host: I, bus: Arc<EventBus<EngineEvent>>) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let host: BTreeMap<String, String> = if settings.inherit_env {
            host.into_iter().collect()
        } else {
            BTreeMap::new()
        };

        let mut state = EnvState {
            profile: settings.profile,
            additional: settings.additional_env.clone(),
            overrides: BTreeMap::new(),
            blocked: settings.blocked_env_vars.clone(),
            effective: BTreeMap::new(),
        };
        state.rebuild(&host);

        debug!(
            inherit = settings.inherit_env,
            profile = %settings.profile,
            vars = state.effective.len(),
            "Environment manager initialized"
        );

        Self {
            inherit: settings.inherit_env,
            host,
            state: RwLock::new(state),
            bus,
        }
    }

    /// Host inheritance is fixed at construction
    pub fn inherits(&self) -> bool {
        self.inherit
    }

    pub fn profile(&self) -> ProfileName {
        self.state.read().profile
    }

    // ========================================================================
    // Managed overrides
    // ========================================================================

    /// Set a managed override
    pub fn set_var(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        validate_key(&key)?;

        {
            let mut state = self.state.write();
            state.overrides.insert(key.clone(), value.into());
            state.rebuild(&self.host);
        }

        debug!(key = %key, "Environment variable set");
        self.bus.publish(EngineEvent::EnvChanged {
            key: Some(key),
            change: EnvChange::Set,
        });
        Ok(())
    }

    /// Effective value (None when unset or blocked)
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.state.read().effective.get(key).cloned()
    }

    /// Remove a managed override; lower layers show through again
    pub fn clear_var(&self, key: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            let removed = state.overrides.remove(key).is_some();
            if removed {
                state.rebuild(&self.host);
            }
            removed
        };

        if removed {
            self.bus.publish(EngineEvent::EnvChanged {
                key: Some(key.to_string()),
                change: EnvChange::Cleared,
            });
        }
        removed
    }

    /// Current managed overrides
    pub fn overrides(&self) -> BTreeMap<String, String> {
        self.state.read().overrides.clone()
    }

    // ========================================================================
    // Blocklist / profile
    // ========================================================================

    pub fn block(&self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        {
            let mut state = self.state.write();
            if !state.blocked.iter().any(|p| p.eq_ignore_ascii_case(&pattern)) {
                state.blocked.push(pattern.clone());
            }
            state.rebuild(&self.host);
        }

        self.bus.publish(EngineEvent::EnvChanged {
            key: Some(pattern),
            change: EnvChange::Blocked,
        });
    }

    /// Remove a user/config pattern; profile defaults stay in force
    pub fn unblock(&self, pattern: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            let before = state.blocked.len();
            state.blocked.retain(|p| !p.eq_ignore_ascii_case(pattern));
            let removed = state.blocked.len() != before;
            if removed {
                state.rebuild(&self.host);
            }
            removed
        };

        if removed {
            self.bus.publish(EngineEvent::EnvChanged {
                key: Some(pattern.to_string()),
                change: EnvChange::Unblocked,
            });
        }
        removed
    }

    /// Whether the active blocklist removes this name
    pub fn is_blocked(&self, name: &str) -> bool {
        matches_any(&self.state.read().blocklist(), name)
    }

    /// Active blocklist, including profile defaults
    pub fn blocklist(&self) -> Vec<String> {
        self.state.read().blocklist()
    }

    pub fn set_profile(&self, profile: ProfileName) {
        let previous = {
            let mut state = self.state.write();
            let previous = std::mem::replace(&mut state.profile, profile);
            state.rebuild(&self.host);
            previous
        };

        if previous != profile {
            info!(from = %previous, to = %profile, "Environment profile changed");
            self.bus.publish(EngineEvent::ProfileChanged {
                from: previous,
                to: profile,
            });
        }
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Effective environment with the blocklist applied
    pub fn effective(&self) -> BTreeMap<String, String> {
        self.state.read().effective.clone()
    }

    /// Every known variable, blocked and secret-looking values redacted
    pub fn get_filtered(&self) -> BTreeMap<String, String> {
        let state = self.state.read();
        let blocklist = state.blocklist();

        state
            .merged(&self.host)
            .into_iter()
            .map(|(k, v)| {
                if matches_any(&blocklist, &k) || is_secret_name(&k) {
                    (k, REDACTED.to_string())
                } else {
                    (k, v)
                }
            })
            .collect()
    }

    /// Environment for one spawn: effective env + per-call vars, blocklist re-applied
    pub fn resolve(&self, per_call: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let state = self.state.read();
        if per_call.is_empty() {
            return state.effective.clone();
        }

        let blocklist = state.blocklist();
        let mut env = state.effective.clone();
        for (k, v) in per_call {
            if matches_any(&blocklist, k) {
                debug!(key = %k, "Dropping blocked per-call variable");
                continue;
            }
            env.insert(k.clone(), v.clone());
        }
        env
    }

    // ========================================================================
    // dotenv
    // ========================================================================

    /// Load a dotenv file into the managed layer; returns how many were set
    pub fn import_dotenv(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| Error::Env(format!("{}: {}", path.display(), e)))?;

        let mut vars = BTreeMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| Error::Env(format!("{}: {}", path.display(), e)))?;
            vars.insert(key, value);
        }

        let count = vars.len();
        {
            let mut state = self.state.write();
            state.overrides.extend(vars);
            state.rebuild(&self.host);
        }

        info!(path = %path.display(), count, "Imported dotenv file");
        self.bus.publish(EngineEvent::EnvChanged {
            key: None,
            change: EnvChange::Imported,
        });
        Ok(count)
    }

    /// Write `KEY=value` lines sorted by key; returns how many were written
    pub fn export_dotenv(&self, path: impl AsRef<Path>, redact: bool) -> Result<usize> {
        let vars = if redact {
            self.get_filtered()
        } else {
            let state = self.state.read();
            state.merged(&self.host)
        };

        let mut content = String::new();
        for (key, value) in &vars {
            content.push_str(key);
            content.push('=');
            content.push_str(&quote_value(value));
            content.push('\n');
        }

        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;

        if !redact {
            warn!(path = %path.display(), "Exported environment without redaction");
        }
        Ok(vars.len())
    }
}

fn quote_value(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '#' | '\\' | '$' | '`'));
    if plain {
        return value.to_string();
    }

    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('$', "\\$");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Vec<(String, String)> {
        vec![
            ("PATH".into(), "/usr/bin".into()),
            ("HOME".into(), "/home/me".into()),
            ("OPENAI_API_KEY".into(), "sk-live".into()),
            ("db_password".into(), "hunter2".into()),
        ]
    }

    fn manager(settings: EnvSettings) -> EnvironmentManager {
        EnvironmentManager::with_host(&settings, host(), Arc::new(EventBus::new()))
    }

    #[test]
    fn test_precedence() {
        let mut settings = EnvSettings::default();
        settings.additional_env.insert("HOME".into(), "/srv".into());
        settings.additional_env.insert("NODE_ENV".into(), "custom".into());
        let env = manager(settings);

        assert_eq!(env.get_var("PATH").as_deref(), Some("/usr/bin"));
        assert_eq!(env.get_var("HOME").as_deref(), Some("/srv"));
        // additional beats profile preset
        assert_eq!(env.get_var("NODE_ENV").as_deref(), Some("custom"));

        env.set_var("HOME", "/override").unwrap();
        assert_eq!(env.get_var("HOME").as_deref(), Some("/override"));

        assert!(env.clear_var("HOME"));
        assert_eq!(env.get_var("HOME").as_deref(), Some("/srv"));
        assert!(!env.clear_var("HOME"));
    }

    #[test]
    fn test_no_inherit() {
        let env = manager(EnvSettings {
            inherit_env: false,
            ..Default::default()
        });
        assert!(!env.inherits());
        assert!(env.get_var("PATH").is_none());
        assert_eq!(env.get_var("HIVE_PROFILE").as_deref(), Some("development"));
    }

    #[test]
    fn test_blocklist_always_wins() {
        let env = manager(EnvSettings {
            blocked_env_vars: vec!["my_*".into()],
            ..Default::default()
        });

        env.set_var("MY_SETTING", "x").unwrap();
        assert!(env.get_var("MY_SETTING").is_none());
        assert!(env.is_blocked("My_Other"));

        let mut per_call = BTreeMap::new();
        per_call.insert("MY_CALL".to_string(), "y".to_string());
        per_call.insert("OK".to_string(), "z".to_string());
        let resolved = env.resolve(&per_call);
        assert!(!resolved.contains_key("MY_CALL"));
        assert_eq!(resolved.get("OK").map(String::as_str), Some("z"));

        assert!(env.unblock("MY_*"));
        assert_eq!(env.get_var("MY_SETTING").as_deref(), Some("x"));
    }

    #[test]
    fn test_profile_blocks_secrets() {
        let env = manager(EnvSettings::default());
        // development keeps secrets in the effective env
        assert!(env.get_var("OPENAI_API_KEY").is_some());

        env.set_profile(ProfileName::Production);
        assert!(env.get_var("OPENAI_API_KEY").is_none());
        assert!(env.get_var("db_password").is_none());
        assert_eq!(env.get_var("NODE_ENV").as_deref(), Some("production"));
        assert_eq!(env.get_var("PATH").as_deref(), Some("/usr/bin"));
    }

    #[test]
    fn test_filtered_never_reveals_blocked_values() {
        for profile in ProfileName::all() {
            let env = manager(EnvSettings {
                profile,
                ..Default::default()
            });
            env.block("INTERNAL_URL");
            env.set_var("INTERNAL_URL", "http://10.0.0.1").unwrap();
            env.set_var("SERVICE_TOKEN", "abc").unwrap();

            let filtered = env.get_filtered();
            assert_eq!(filtered["INTERNAL_URL"], REDACTED, "profile {}", profile);
            assert_eq!(filtered["SERVICE_TOKEN"], REDACTED, "profile {}", profile);
            assert_eq!(filtered["OPENAI_API_KEY"], REDACTED, "profile {}", profile);
            assert_eq!(filtered["PATH"], "/usr/bin");
            assert!(!filtered.values().any(|v| v == "http://10.0.0.1" || v == "abc"));
        }
    }

    #[test]
    fn test_invalid_key() {
        let env = manager(EnvSettings::default());
        assert!(matches!(env.set_var("", "x"), Err(Error::InvalidInput(_))));
        assert!(env.set_var("A=B", "x").is_err());
    }

    #[test]
    fn test_dotenv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.env");
        std::fs::write(&source, "# comment\nAPP_PORT=8080\nGREETING=\"hello world\"\n").unwrap();

        let bus = Arc::new(EventBus::new());
        let env = EnvironmentManager::with_host(&EnvSettings::default(), host(), Arc::clone(&bus));
        assert_eq!(env.import_dotenv(&source).unwrap(), 2);
        assert_eq!(env.get_var("GREETING").as_deref(), Some("hello world"));
        assert!(bus
            .history(None)
            .iter()
            .any(|r| matches!(r.event, EngineEvent::EnvChanged { change: EnvChange::Imported, .. })));

        let out = dir.path().join("nested/out.env");
        env.export_dotenv(&out, true).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("OPENAI_API_KEY=[REDACTED]"));
        assert!(!text.contains("sk-live"));

        let keys: Vec<&str> = text.lines().filter_map(|l| l.split('=').next()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        // exported file parses back to the same values
        let fresh = manager(EnvSettings {
            inherit_env: false,
            ..Default::default()
        });
        fresh.import_dotenv(&out).unwrap();
        assert_eq!(fresh.get_var("GREETING").as_deref(), Some("hello world"));
        assert_eq!(fresh.get_var("APP_PORT").as_deref(), Some("8080"));
    }

    #[test]
    fn test_missing_dotenv_is_env_error() {
        let env = manager(EnvSettings::default());
        assert!(matches!(
            env.import_dotenv("/definitely/not/here.env"),
            Err(Error::Env(_))
        ));
    }
}
