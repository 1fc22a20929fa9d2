//! Lease acquisition, renewal, and release.
//!
//! The acquire path is check-then-act against the shared store: two racing
//! sessions can both observe "no lease" and both write one. That window is
//! accepted: the contract is cooperative advisory locking for well-behaved
//! participants, not linearizable mutual exclusion. A store outage fails
//! closed: `acquire` reports a conflict with an unknown owner rather than
//! silently permitting a concurrent write.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::{CoordError, Result};
use crate::history::HistoryEvent;
use crate::model::{Conflict, Lease};
use crate::resource;
use crate::store;
use crate::Coordinator;

impl Coordinator {
    /// Attempts to take the advisory lease on `resource` for `session_id`.
    ///
    /// Reentrant: if the caller already holds the lease, the expiry is
    /// refreshed and the same lease is returned. An expired lease is taken
    /// over regardless of its previous owner.
    pub fn acquire(
        &self,
        resource: &str,
        session_id: &str,
        ttl: Duration,
        reason: Option<&str>,
    ) -> std::result::Result<Lease, Conflict> {
        self.acquire_at(resource, session_id, ttl, reason, Utc::now())
    }

    pub fn acquire_at(
        &self,
        resource: &str,
        session_id: &str,
        ttl: Duration,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> std::result::Result<Lease, Conflict> {
        let resource_id = resource::resource_id(resource);

        // Opportunistic reclamation so correctness never depends on the
        // periodic sweep actually running.
        if let Err(err) = self.sweep_at(now) {
            debug!(error = %err, "Opportunistic sweep failed; continuing with acquire");
        }

        let existing = match store::find_lease(self.store(), &resource_id) {
            Ok(existing) => existing,
            Err(err) => {
                warn!(
                    resource_id = %resource_id,
                    error = %err,
                    "Store unreachable during acquire; failing closed"
                );
                return Err(Conflict::unknown(&resource_id));
            }
        };

        match existing {
            Some(lease) if !lease.is_expired(now) => {
                if lease.owner_session_id == session_id {
                    let renewed = Lease {
                        expires_at: now + ttl,
                        reason: reason.map(str::to_string).or(lease.reason.clone()),
                        ..lease
                    };
                    if let Err(err) = store::append_lease(self.store(), &renewed) {
                        warn!(resource_id = %resource_id, error = %err, "Failed to write renewal; failing closed");
                        return Err(Conflict::unknown(&resource_id));
                    }
                    debug!(
                        resource_id = %resource_id,
                        session_id = %session_id,
                        expires_at = %renewed.expires_at.to_rfc3339(),
                        "Reentrant acquire extended lease"
                    );
                    Ok(renewed)
                } else {
                    Err(Conflict::from_lease(&lease))
                }
            }
            _ => {
                let lease = Lease {
                    resource_id: resource_id.clone(),
                    owner_session_id: session_id.to_string(),
                    acquired_at: now,
                    expires_at: now + ttl,
                    reason: reason.map(str::to_string),
                };
                if let Err(err) = store::put_lease(self.store(), &lease) {
                    warn!(resource_id = %resource_id, error = %err, "Failed to write lease; failing closed");
                    return Err(Conflict::unknown(&resource_id));
                }
                info!(
                    resource_id = %resource_id,
                    session_id = %session_id,
                    ttl_secs = ttl.num_seconds(),
                    "Lease acquired"
                );
                Ok(lease)
            }
        }
    }

    /// Extends a held lease. Unlike `acquire` this is strict: the caller
    /// must be the current owner of an existing lease.
    pub fn renew(&self, resource: &str, session_id: &str, ttl: Duration) -> Result<Lease> {
        self.renew_at(resource, session_id, ttl, Utc::now())
    }

    pub fn renew_at(
        &self,
        resource: &str,
        session_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease> {
        let resource_id = resource::resource_id(resource);
        match store::find_lease(self.store(), &resource_id)? {
            None => Err(CoordError::NoSuchLease { resource_id }),
            Some(lease) if lease.owner_session_id != session_id => Err(CoordError::NotOwner {
                resource_id,
                owner: lease.owner_session_id,
            }),
            Some(lease) => {
                let renewed = Lease {
                    expires_at: now + ttl,
                    ..lease
                };
                store::append_lease(self.store(), &renewed)?;
                debug!(
                    resource_id = %resource_id,
                    session_id = %session_id,
                    "Lease renewed"
                );
                Ok(renewed)
            }
        }
    }

    /// Releases the lease iff `session_id` owns it. Releasing an absent
    /// lease, or one owned by somebody else, is a logged no-op: never an
    /// error, and never a deletion of the other owner's lease.
    pub fn release(&self, resource: &str, session_id: &str) -> Result<()> {
        let resource_id = resource::resource_id(resource);
        match store::find_lease(self.store(), &resource_id)? {
            None => Ok(()),
            Some(lease) if lease.owner_session_id == session_id => {
                store::delete_lease(self.store(), &resource_id)?;
                info!(resource_id = %resource_id, session_id = %session_id, "Lease released");
                Ok(())
            }
            Some(lease) => {
                warn!(
                    resource_id = %resource_id,
                    session_id = %session_id,
                    owner = %lease.owner_session_id,
                    "Release by non-owner ignored"
                );
                Ok(())
            }
        }
    }

    /// Releases every lease owned by the session (graceful shutdown path).
    /// Returns the released resource ids.
    pub fn release_all(&self, session_id: &str) -> Result<Vec<String>> {
        let leases = store::load_leases(self.store())?;
        let mut released = Vec::new();
        let mut names = Vec::new();
        for lease in leases {
            if lease.owner_session_id == session_id {
                names.push(store_protocol::lease_entity_name(&lease.resource_id));
                released.push(lease.resource_id);
            }
        }
        if !names.is_empty() {
            self.store().delete(&names)?;
            info!(
                session_id = %session_id,
                count = released.len(),
                "Released all leases for session"
            );
        }
        Ok(released)
    }

    /// Deletes the lease unconditionally, bypassing the advisory contract.
    /// Always logged at WARN naming the actor and the previous owner, and
    /// recorded as a forced override in history. Returns the displaced
    /// lease, if any existed.
    pub fn force_release(&self, resource: &str, actor: &str) -> Result<Option<Lease>> {
        self.force_release_at(resource, actor, Utc::now())
    }

    pub fn force_release_at(
        &self,
        resource: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>> {
        let resource_id = resource::resource_id(resource);
        let previous = store::find_lease(self.store(), &resource_id)?;
        store::delete_lease(self.store(), &resource_id)?;

        if let Some(previous) = &previous {
            warn!(
                resource_id = %resource_id,
                actor = %actor,
                previous_owner = %previous.owner_session_id,
                "Lease forcibly released"
            );
            self.history().record_at(
                HistoryEvent::ForcedOverride {
                    resource_id: resource_id.clone(),
                    previous_owner: previous.owner_session_id.clone(),
                    actor: actor.to_string(),
                },
                now,
            );
        }
        Ok(previous)
    }

    /// Every lease record currently in the store, expired ones included.
    /// Callers wanting only live leases should sweep first or filter on
    /// `is_expired`.
    pub fn list_leases(&self) -> Result<Vec<Lease>> {
        Ok(store::load_leases(self.store())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryLog;
    use crate::model::UNKNOWN_OWNER;
    use crate::store::MemoryStore;
    use crate::Config;
    use std::sync::Arc;

    fn instant(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid instant")
            .with_timezone(&Utc)
    }

    fn coordinator(temp: &tempfile::TempDir) -> (Coordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let coord = Coordinator::new(
            store.clone(),
            Config::default(),
            HistoryLog::new(temp.path().join("history")),
        );
        (coord, store)
    }

    const HOUR: i64 = 3600;

    #[test]
    fn conflicting_acquire_reports_holder_context() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator(&temp);
        let now = instant("2026-01-31T00:00:00Z");

        coord
            .acquire_at(
                "auth.py",
                "session-a",
                Duration::seconds(HOUR),
                Some("rewriting login"),
                now,
            )
            .unwrap();

        let conflict = coord
            .acquire_at("auth.py", "session-b", Duration::seconds(HOUR), None, now)
            .unwrap_err();
        assert_eq!(conflict.held_by, "session-a");
        assert_eq!(conflict.reason.as_deref(), Some("rewriting login"));
        assert_eq!(conflict.expires_at, Some(now + Duration::seconds(HOUR)));
    }

    #[test]
    fn reentrant_acquire_extends_expiry() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator(&temp);
        let first = instant("2026-01-31T00:00:00Z");
        let second = instant("2026-01-31T00:30:00Z");

        let lease = coord
            .acquire_at("auth.py", "session-a", Duration::seconds(HOUR), None, first)
            .unwrap();
        let renewed = coord
            .acquire_at("auth.py", "session-a", Duration::seconds(HOUR), None, second)
            .unwrap();

        assert_eq!(renewed.acquired_at, lease.acquired_at);
        assert_eq!(renewed.expires_at, second + Duration::seconds(HOUR));
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator(&temp);
        let start = instant("2026-01-31T00:00:00Z");
        let later = instant("2026-01-31T02:00:00Z");

        coord
            .acquire_at("auth.py", "session-a", Duration::seconds(HOUR), None, start)
            .unwrap();
        let lease = coord
            .acquire_at("auth.py", "session-b", Duration::seconds(HOUR), None, later)
            .unwrap();
        assert_eq!(lease.owner_session_id, "session-b");
    }

    #[test]
    fn acquire_fails_closed_when_store_is_down() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, store) = coordinator(&temp);
        store.set_offline(true);

        let conflict = coord
            .acquire_at(
                "auth.py",
                "session-a",
                Duration::seconds(HOUR),
                None,
                instant("2026-01-31T00:00:00Z"),
            )
            .unwrap_err();
        assert_eq!(conflict.held_by, UNKNOWN_OWNER);
    }

    #[test]
    fn renew_by_non_owner_errors() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator(&temp);
        let now = instant("2026-01-31T00:00:00Z");

        coord
            .acquire_at("auth.py", "session-a", Duration::seconds(HOUR), None, now)
            .unwrap();
        let err = coord
            .renew_at("auth.py", "session-b", Duration::seconds(HOUR), now)
            .unwrap_err();
        assert!(matches!(err, CoordError::NotOwner { .. }));
    }

    #[test]
    fn renew_without_lease_errors() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator(&temp);
        let err = coord
            .renew_at(
                "auth.py",
                "session-a",
                Duration::seconds(HOUR),
                instant("2026-01-31T00:00:00Z"),
            )
            .unwrap_err();
        assert!(matches!(err, CoordError::NoSuchLease { .. }));
    }

    #[test]
    fn release_is_idempotent_and_owner_checked() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator(&temp);
        let now = instant("2026-01-31T00:00:00Z");

        // Absent lease: no-op.
        coord.release("auth.py", "session-a").unwrap();

        coord
            .acquire_at("auth.py", "session-a", Duration::seconds(HOUR), None, now)
            .unwrap();

        // Wrong owner: no-op, lease survives.
        coord.release("auth.py", "session-b").unwrap();
        assert_eq!(coord.list_leases().unwrap().len(), 1);

        coord.release("auth.py", "session-a").unwrap();
        assert!(coord.list_leases().unwrap().is_empty());
    }

    #[test]
    fn force_release_displaces_live_owner_and_records_override() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator(&temp);
        let now = instant("2026-01-31T00:00:00Z");

        coord
            .acquire_at("auth.py", "session-a", Duration::seconds(HOUR), None, now)
            .unwrap();
        let previous = coord.force_release_at("auth.py", "operator", now).unwrap();
        assert_eq!(previous.unwrap().owner_session_id, "session-a");
        assert!(coord.list_leases().unwrap().is_empty());

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
    fn force_release_of_absent_lease_records_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let (coord, _) = coordinator(&temp);
        let now = instant("2026-01-31T00:00:00Z");

        let previous = coord.force_release_at("auth.py", "operator", now).unwrap();
        assert!(previous.is_none());
        assert!(coord
            .history()
            .read_window(now - Duration::seconds(1))
            .unwrap()
            .is_empty());
    }
}
