//! Effective timeout resolution

use crate::pattern::wildcard_match;
use hive_foundation::{TimeoutOverride, TimeoutSettings};
use parking_lot::RwLock;
use std::time::Duration;

/// explicit per-call value → first matching override → default, clamped to max
pub struct TimeoutPolicy {
    default: Duration,
    max: Duration,
    warning_ratio: f64,
    overrides: RwLock<Vec<TimeoutOverride>>,
}

impl TimeoutPolicy {
    pub fn new(settings: &TimeoutSettings) -> Self {
        Self {
            default: Duration::from_millis(settings.default_ms),
            max: Duration::from_millis(settings.max_ms),
            warning_ratio: settings.warning_ratio.clamp(0.0, 1.0),
            overrides: RwLock::new(settings.overrides.clone()),
        }
    }

    /// A zero explicit timeout counts as "not given"
    pub fn effective(&self, command: &str, explicit: Option<Duration>) -> Duration {
        let chosen = explicit
            .filter(|t| !t.is_zero())
            .or_else(|| {
                self.overrides
                    .read()
                    .iter()
                    .find(|o| wildcard_match(&o.pattern, command, false))
                    .map(|o| Duration::from_millis(o.timeout_ms))
            })
            .unwrap_or(self.default);

        chosen.min(self.max)
    }

    /// Point at which the warning event fires
    pub fn warning_at(&self, timeout: Duration) -> Duration {
        timeout.mul_f64(self.warning_ratio)
    }

    /// Register (or replace) an override for a command pattern
    pub fn set_override(&self, pattern: impl Into<String>, timeout: Duration) {
        let pattern = pattern.into();
        let mut overrides = self.overrides.write();
        overrides.retain(|o| o.pattern != pattern);
        overrides.push(TimeoutOverride {
            pattern,
            timeout_ms: timeout.as_millis() as u64,
        });
    }

    pub fn remove_override(&self, pattern: &str) -> bool {
        let mut overrides = self.overrides.write();
        let before = overrides.len();
        overrides.retain(|o| o.pattern != pattern);
        overrides.len() != before
    }

    pub fn overrides(&self) -> Vec<TimeoutOverride> {
        self.overrides.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TimeoutPolicy {
        TimeoutPolicy::new(&TimeoutSettings {
            default_ms: 30_000,
            max_ms: 120_000,
            warning_ratio: 0.8,
            overrides: vec![TimeoutOverride {
                pattern: "cargo build*".into(),
                timeout_ms: 90_000,
            }],
        })
    }

    #[test]
    fn test_resolution_order() {
        let policy = policy();
        assert_eq!(
            policy.effective("echo hi", Some(Duration::from_millis(200))),
            Duration::from_millis(200)
        );
        assert_eq!(
            policy.effective("cargo build --release", None),
            Duration::from_secs(90)
        );
        assert_eq!(policy.effective("echo hi", None), Duration::from_secs(30));
        // zero is ignored
        assert_eq!(
            policy.effective("echo hi", Some(Duration::ZERO)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_clamped_to_max() {
        let policy = policy();
        assert_eq!(
            policy.effective("x", Some(Duration::from_secs(3600))),
            Duration::from_secs(120)
        );

        policy.set_override("npm *", Duration::from_secs(600));
        assert_eq!(policy.effective("npm install", None), Duration::from_secs(120));
        assert!(policy.remove_override("npm *"));
        assert_eq!(policy.effective("npm install", None), Duration::from_secs(30));
    }

    #[test]
    fn test_warning_point() {
        let policy = policy();
        assert_eq!(
            policy.warning_at(Duration::from_millis(1000)),
            Duration::from_millis(800)
        );
    }
}
