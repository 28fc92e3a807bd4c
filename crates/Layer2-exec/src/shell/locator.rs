//! Shell locator - logical shell type → verified executable path
//!
//! Well-known absolute paths are checked first, then PATH through `which`.
//! Successful lookups are cached for a TTL; failures are not cached.

use crate::events::EngineEvent;
use hive_foundation::{Error, EventBus, Result, ShellType};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Hard limit for a version probe
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Description of one shell on this host
#[derive(Debug, Clone, Serialize)]
pub struct ShellInfo {
    pub shell_type: ShellType,
    pub path: Option<PathBuf>,
    pub available: bool,
    /// First line of the version probe, None = unknown
    pub version: Option<String>,
}

/// A shell ready to be spawned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShell {
    pub shell_type: ShellType,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    path: PathBuf,
    located_at: Instant,
}

/// Shell locator with TTL cache and fallback ordering
pub struct ShellLocator {
    cache: RwLock<HashMap<ShellType, CacheEntry>>,
    ttl: Duration,
    preferred: RwLock<ShellType>,
    auto_fallback: AtomicBool,
    /// Restrict lookups to this PATH value (absolute candidates are skipped)
    search_path: Option<OsString>,
    bus: Arc<EventBus<EngineEvent>>,
}

impl ShellLocator {
    pub fn new(
        preferred: ShellType,
        ttl: Duration,
        auto_fallback: bool,
        bus: Arc<EventBus<EngineEvent>>,
    ) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
            preferred: RwLock::new(preferred),
            auto_fallback: AtomicBool::new(auto_fallback),
            search_path: None,
            bus,
        }
    }

    /// Only look for shells on the given PATH value
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Path of a shell, or None if it is not installed
    pub fn locate(&self, shell: ShellType) -> Option<PathBuf> {
        if let Some(entry) = self.cache.read().get(&shell) {
            if entry.located_at.elapsed() < self.ttl {
                return Some(entry.path.clone());
            }
        }

        let found = self.lookup(shell)?;
        debug!(shell = %shell, path = %found.display(), "Located shell");

        self.cache.write().insert(
            shell,
            CacheEntry {
                path: found.clone(),
                located_at: Instant::now(),
            },
        );

        Some(found)
    }

    fn lookup(&self, shell: ShellType) -> Option<PathBuf> {
        if self.search_path.is_none() {
            if let Some(path) = shell
                .candidate_paths()
                .iter()
                .map(Path::new)
                .find(|p| p.is_file())
            {
                return Some(path.to_path_buf());
            }
        }

        shell.executable_names().iter().find_map(|name| match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().ok()?;
                which::which_in(name, Some(paths), cwd).ok()
            }
            None => which::which(name).ok(),
        })
    }

    /// Every installed shell, sorted by the platform fallback order
    pub fn list_available(&self) -> Vec<ShellType> {
        let mut shells: Vec<ShellType> = ShellType::all()
            .into_iter()
            .filter(|s| self.locate(*s).is_some())
            .collect();
        shells.sort_by_key(|s| s.fallback_rank());
        shells
    }

    /// First installed shell in fallback order, skipping `except`
    fn first_fallback(&self, except: ShellType) -> Option<(ShellType, PathBuf)> {
        ShellType::fallback_order()
            .iter()
            .filter(|s| **s != except)
            .find_map(|s| self.locate(*s).map(|p| (*s, p)))
    }

    /// Requested (or preferred) shell, falling back when enabled
    pub fn resolve(&self, requested: Option<ShellType>) -> Result<ResolvedShell> {
        let wanted = requested.unwrap_or_else(|| self.preferred());

        if let Some(path) = self.locate(wanted) {
            return Ok(ResolvedShell {
                shell_type: wanted,
                path,
            });
        }

        if self.auto_fallback() {
            if let Some((fallback, path)) = self.first_fallback(wanted) {
                warn!(requested = %wanted, fallback = %fallback, "Shell not found, falling back");
                self.bus.publish(EngineEvent::ShellFallback {
                    requested: wanted,
                    fallback,
                });
                return Ok(ResolvedShell {
                    shell_type: fallback,
                    path,
                });
            }
        }

        self.bus
            .publish(EngineEvent::ShellNotFound { requested: wanted });
        Err(Error::ShellNotFound(wanted.to_string()))
    }

    // ========================================================================
    // Preference
    // ========================================================================

    pub fn preferred(&self) -> ShellType {
        *self.preferred.read()
    }

    pub fn auto_fallback(&self) -> bool {
        self.auto_fallback.load(Ordering::SeqCst)
    }

    /// Switch the preferred shell; false only if no shell at all is usable
    pub fn set_preferred(&self, shell: ShellType) -> bool {
        if self.locate(shell).is_some() {
            self.adopt(shell);
            return true;
        }

        if self.auto_fallback() {
            if let Some((fallback, _)) = self.first_fallback(shell) {
                warn!(requested = %shell, fallback = %fallback, "Preferred shell unavailable, using fallback");
                self.adopt(fallback);
                self.bus.publish(EngineEvent::ShellFallback {
                    requested: shell,
                    fallback,
                });
                return true;
            }
        }

        self.bus
            .publish(EngineEvent::ShellNotFound { requested: shell });
        false
    }

    fn adopt(&self, shell: ShellType) {
        let previous = std::mem::replace(&mut *self.preferred.write(), shell);
        if previous != shell {
            self.invalidate(previous);
            info!(from = %previous, to = %shell, "Preferred shell changed");
            self.bus.publish(EngineEvent::ShellChanged {
                from: previous,
                to: shell,
            });
        }
    }

    // ========================================================================
    // Info / cache
    // ========================================================================

    /// Location plus version probe; the probe never fails the lookup
    pub async fn info(&self, shell: ShellType) -> ShellInfo {
        let path = self.locate(shell);
        let version = match (&path, shell.version_args()) {
            (Some(path), Some(args)) => probe_version(path, args).await,
            _ => None,
        };

        ShellInfo {
            shell_type: shell,
            available: path.is_some(),
            path,
            version,
        }
    }

    pub fn invalidate(&self, shell: ShellType) {
        self.cache.write().remove(&shell);
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    pub fn cached(&self) -> Vec<ShellType> {
        self.cache.read().keys().copied().collect()
    }
}

async fn probe_version(path: &Path, args: &[&str]) -> Option<String> {
    let mut cmd = Command::new(path);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(VERSION_PROBE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string),
        Ok(Err(e)) => {
            debug!(path = %path.display(), error = %e, "Version probe failed");
            None
        }
        Err(_) => {
            debug!(path = %path.display(), "Version probe timed out");
            None
        }
    }
}
