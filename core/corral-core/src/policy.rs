//! Conflict policy resolution.
//!
//! Pure configuration lookup, no state: conflict-handling mode, lease TTL by
//! resource pattern, and the optional priority-preemption rule.

use chrono::Duration;
use regex::Regex;
use tracing::warn;

use crate::config::{Config, ConflictAction};

pub struct Policy {
    conflict_action: ConflictAction,
    default_ttl: Duration,
    overrides: Vec<(Regex, Duration)>,
    preemption_enabled: bool,
}

impl Policy {
    pub fn from_config(config: &Config) -> Self {
        let mut overrides = Vec::with_capacity(config.ttl_overrides.len());
        for entry in &config.ttl_overrides {
            match Regex::new(&entry.pattern) {
                Ok(pattern) => overrides.push((pattern, Duration::seconds(entry.ttl_secs as i64))),
                Err(err) => {
                    warn!(pattern = %entry.pattern, error = %err, "Ignoring invalid TTL override pattern");
                }
            }
        }
        Self {
            conflict_action: config.conflict_action,
            default_ttl: config.lock_timeout(),
            overrides,
            preemption_enabled: config.preemption_enabled,
        }
    }

    pub fn conflict_action(&self) -> ConflictAction {
        self.conflict_action
    }

    /// Lease TTL for a resource: first matching override wins, else the
    /// deployment default. Matched against the normalized path, not the
    /// digest-suffixed id.
    pub fn ttl_for(&self, normalized_path: &str) -> Duration {
        for (pattern, ttl) in &self.overrides {
            if pattern.is_match(normalized_path) {
                return *ttl;
            }
        }
        self.default_ttl
    }

    /// Whether a requester may force-break the holder's lease. Strictly
    /// higher priority only; equal priority keeps the incumbent (earliest
    /// acquirer wins). Unset priority counts as zero.
    pub fn may_preempt(&self, requester: Option<u32>, holder: Option<u32>) -> bool {
        self.preemption_enabled && requester.unwrap_or(0) > holder.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtlOverride;

    fn config_with_overrides(overrides: Vec<TtlOverride>) -> Config {
        Config {
            ttl_overrides: overrides,
            ..Config::default()
        }
    }

    #[test]
    fn default_ttl_applies_without_overrides() {
        let policy = Policy::from_config(&Config::default());
        assert_eq!(policy.ttl_for("src/auth.py"), Duration::seconds(3600));
    }

    #[test]
    fn first_matching_override_wins() {
        let config = config_with_overrides(vec![
            TtlOverride {
                pattern: r"\.md$".to_string(),
                ttl_secs: 300,
            },
            TtlOverride {
                pattern: r"^docs/".to_string(),
                ttl_secs: 900,
            },
        ]);
        let policy = Policy::from_config(&config);
        assert_eq!(policy.ttl_for("docs/README.md"), Duration::seconds(300));
        assert_eq!(policy.ttl_for("docs/spec.rst"), Duration::seconds(900));
        assert_eq!(policy.ttl_for("src/lib.rs"), Duration::seconds(3600));
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let config = config_with_overrides(vec![
            TtlOverride {
                pattern: "[unclosed".to_string(),
                ttl_secs: 1,
            },
            TtlOverride {
                pattern: r"\.lock$".to_string(),
                ttl_secs: 30,
            },
        ]);
        let policy = Policy::from_config(&config);
        assert_eq!(policy.ttl_for("Cargo.lock"), Duration::seconds(30));
    }

    #[test]
    fn preemption_requires_enable_flag_and_strictly_higher_priority() {
        let disabled = Policy::from_config(&Config::default());
        assert!(!disabled.may_preempt(Some(10), Some(1)));

        let enabled = Policy::from_config(&Config {
            preemption_enabled: true,
            ..Config::default()
        });
        assert!(enabled.may_preempt(Some(10), Some(1)));
        assert!(enabled.may_preempt(Some(1), None));
        // Equal priority keeps the incumbent.
        assert!(!enabled.may_preempt(Some(5), Some(5)));
        assert!(!enabled.may_preempt(None, None));
        assert!(!enabled.may_preempt(Some(1), Some(2)));
    }
}
