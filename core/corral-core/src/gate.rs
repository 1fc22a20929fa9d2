//! Pre-operation gate.
//!
//! Invoked synchronously immediately before a mutating operation on a
//! resource. Consults the lease manager and resolves conflicts per policy:
//! block (default), warn-and-proceed, or skip the check entirely. The gate
//! itself never errors; store trouble surfaces as a fail-closed conflict
//! from `acquire`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ConflictAction;
use crate::model::{Conflict, Lease, UNKNOWN_OWNER};
use crate::resource;
use crate::store;
use crate::Coordinator;

/// Outcome of the gate check, serialized as-is for hook consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Operation may proceed. `lease` is absent only in `proceed` mode,
    /// where the conflict check is skipped entirely.
    Allow { lease: Option<Lease> },
    /// Conflict observed, but policy says proceed without a lease.
    Warn { conflict: Conflict },
    /// Operation refused. `busy` lists every currently leased resource so
    /// the caller can pick alternative work instead of retrying blindly.
    Block { conflict: Conflict, busy: Vec<String> },
}

impl Coordinator {
    pub fn pre_operation(&self, kind: &str, resource_path: &str, session_id: &str) -> GateDecision {
        self.pre_operation_at(kind, resource_path, session_id, Utc::now())
    }

    pub fn pre_operation_at(
        &self,
        kind: &str,
        resource_path: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> GateDecision {
        if self.policy().conflict_action() == ConflictAction::Proceed {
            debug!(kind = %kind, resource = %resource_path, "Conflict check skipped by policy");
            return GateDecision::Allow { lease: None };
        }

        let normalized = resource::normalize_path(resource_path);
        let ttl = self.policy().ttl_for(&normalized);
        let reason = format!("{} {}", kind, normalized);

        let conflict =
            match self.acquire_at(resource_path, session_id, ttl, Some(reason.as_str()), now) {
                Ok(lease) => return GateDecision::Allow { lease: Some(lease) },
                Err(conflict) => conflict,
            };

        if let Some(lease) = self.try_preempt(&conflict, resource_path, session_id, ttl, now) {
            return GateDecision::Allow { lease: Some(lease) };
        }

        match self.policy().conflict_action() {
            ConflictAction::Warn => {
                warn!(
                    resource = %conflict.resource_id,
                    held_by = %conflict.held_by,
                    "Conflict ignored by policy; proceeding without a lease"
                );
                GateDecision::Warn { conflict }
            }
            _ => {
                if self.config().notify_conflicts {
                    warn!(
                        resource = %conflict.resource_id,
                        held_by = %conflict.held_by,
                        expires_at = ?conflict.expires_at,
                        "Operation blocked by held lease"
                    );
                }
                let busy = self.busy_resources(now, &conflict);
                GateDecision::Block { conflict, busy }
            }
        }
    }

    /// Priority preemption: a strictly higher-priority requester force-breaks
    /// the holder's lease and takes it. Disabled by default; never applies
    /// when the holder is unknown (store outage fails closed).
    fn try_preempt(
        &self,
        conflict: &Conflict,
        resource_path: &str,
        session_id: &str,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Option<Lease> {
        if conflict.held_by == UNKNOWN_OWNER {
            return None;
        }

        let requester = self.session_priority(session_id);
        let holder = self.session_priority(&conflict.held_by);
        if !self.policy().may_preempt(requester, holder) {
            return None;
        }

        warn!(
            resource = %conflict.resource_id,
            requester = %session_id,
            holder = %conflict.held_by,
            "Preempting lower-priority lease"
        );
        if let Err(err) = self.force_release_at(resource_path, session_id, now) {
            warn!(error = %err, "Preemption failed; falling back to conflict policy");
            return None;
        }
        self.acquire_at(resource_path, session_id, ttl, None, now).ok()
    }

    fn session_priority(&self, session_id: &str) -> Option<u32> {
        match store::find_session(self.store(), session_id) {
            Ok(Some(session)) => session.priority,
            _ => None,
        }
    }

    /// Currently held (unexpired) resources, for the "what else is taken"
    /// half of a block message. Falls back to just the conflicting resource
    /// when the store cannot be listed.
    fn busy_resources(&self, now: DateTime<Utc>, conflict: &Conflict) -> Vec<String> {
        match store::load_leases(self.store()) {
            Ok(leases) => {
                let mut busy: Vec<String> = leases
                    .into_iter()
                    .filter(|lease| !lease.is_expired(now))
                    .map(|lease| lease.resource_id)
                    .collect();
                busy.sort();
                busy
            }
            Err(_) => vec![conflict.resource_id.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryEvent, HistoryLog};
    use crate::model::SessionMetadata;
    use crate::store::MemoryStore;
    use crate::Config;
    use chrono::Duration;
    use std::sync::Arc;

    fn instant(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid instant")
            .with_timezone(&Utc)
    }

    fn coordinator_with(config: Config, temp: &tempfile::TempDir) -> (Coordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let coord = Coordinator::new(
            store.clone(),
            config,
            HistoryLog::new(temp.path().join("history")),
        );
        (coord, store)
    }

    fn register_with_priority(
        coord: &Coordinator,
        session_id: &str,
        priority: Option<u32>,
        now: DateTime<Utc>,
    ) {
        coord
            .register_at(
                session_id,
                SessionMetadata {
                    host: "remote.example".to_string(),
                    pid: 1,
                    priority,
                    ..SessionMetadata::default()
                },
                now,
            )
            .unwrap();
    }

    #[test]
    fn gate_allows_and_holds_a_lease() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator_with(Config::default(), &temp);
        let now = instant("2026-01-31T00:00:00Z");

        match coord.pre_operation_at("edit", "src/auth.py", "s-1", now) {
            GateDecision::Allow { lease: Some(lease) } => {
                assert_eq!(lease.owner_session_id, "s-1");
                assert_eq!(lease.expires_at, now + Duration::seconds(3600));
            }
            other => panic!("expected allow with lease, got {:?}", other),
        }
    }

    #[test]
    fn gate_blocks_with_conflict_and_busy_list() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator_with(Config::default(), &temp);
        let now = instant("2026-01-31T00:00:00Z");

        coord.pre_operation_at("edit", "auth.py", "s-1", now);
        coord.pre_operation_at("edit", "models.py", "s-1", now);

        match coord.pre_operation_at("edit", "auth.py", "s-2", now) {
            GateDecision::Block { conflict, busy } => {
                assert_eq!(conflict.held_by, "s-1");
                assert_eq!(busy.len(), 2);
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn warn_mode_proceeds_without_a_lease() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator_with(
            Config {
                conflict_action: ConflictAction::Warn,
                ..Config::default()
            },
            &temp,
        );
        let now = instant("2026-01-31T00:00:00Z");

        coord.pre_operation_at("edit", "auth.py", "s-1", now);
        match coord.pre_operation_at("edit", "auth.py", "s-2", now) {
            GateDecision::Warn { conflict } => assert_eq!(conflict.held_by, "s-1"),
            other => panic!("expected warn, got {:?}", other),
        }

        // The original lease is untouched.
        let leases = coord.list_leases().unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].owner_session_id, "s-1");
    }

    #[test]
    fn proceed_mode_skips_the_check() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator_with(
            Config {
                conflict_action: ConflictAction::Proceed,
                ..Config::default()
            },
            &temp,
        );

        match coord.pre_operation_at(
            "edit",
            "auth.py",
            "s-1",
            instant("2026-01-31T00:00:00Z"),
        ) {
            GateDecision::Allow { lease: None } => {}
            other => panic!("expected allow without lease, got {:?}", other),
        }
        assert!(coord.list_leases().unwrap().is_empty());
    }

    #[test]
    fn higher_priority_session_preempts() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator_with(
            Config {
                preemption_enabled: true,
                ..Config::default()
            },
            &temp,
        );
        let now = instant("2026-01-31T00:00:00Z");

        register_with_priority(&coord, "s-low", Some(1), now);
        register_with_priority(&coord, "s-high", Some(9), now);
        coord.pre_operation_at("edit", "auth.py", "s-low", now);

        match coord.pre_operation_at("edit", "auth.py", "s-high", now) {
            GateDecision::Allow { lease: Some(lease) } => {
                assert_eq!(lease.owner_session_id, "s-high");
            }
            other => panic!("expected preempting allow, got {:?}", other),
        }

        // Preemption bypassed the advisory contract and must leave a trail.
        let overrides: Vec<_> = coord
            .history()
            .read_window(now - Duration::seconds(1))
            .unwrap()
            .into_iter()
            .filter(|r| matches!(r.event, HistoryEvent::ForcedOverride { .. }))
            .collect();
        assert_eq!(overrides.len(), 1);
    }

    #[test]
    fn equal_priority_never_preempts() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator_with(
            Config {
                preemption_enabled: true,
                ..Config::default()
            },
            &temp,
        );
        let now = instant("2026-01-31T00:00:00Z");

        register_with_priority(&coord, "s-a", Some(5), now);
        register_with_priority(&coord, "s-b", Some(5), now);
        coord.pre_operation_at("edit", "auth.py", "s-a", now);

        assert!(matches!(
            coord.pre_operation_at("edit", "auth.py", "s-b", now),
            GateDecision::Block { .. }
        ));
    }

    #[test]
    fn unknown_owner_conflict_is_never_preempted() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, store) = coordinator_with(
            Config {
                preemption_enabled: true,
                ..Config::default()
            },
            &temp,
        );
        store.set_offline(true);

        match coord.pre_operation_at(
            "edit",
            "auth.py",
            "s-1",
            instant("2026-01-31T00:00:00Z"),
        ) {
            GateDecision::Block { conflict, .. } => {
                assert_eq!(conflict.held_by, UNKNOWN_OWNER);
            }
            other => panic!("expected fail-closed block, got {:?}", other),
        }
    }
}
