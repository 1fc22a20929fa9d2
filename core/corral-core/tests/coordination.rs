//! End-to-end coordination flows across multiple sessions sharing one store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use corral_core::{
    Config, Coordinator, GateDecision, HistoryEvent, HistoryLog, MemoryStore, SessionMetadata,
    SessionStatus, SqliteStore,
};

fn instant(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid instant")
        .with_timezone(&Utc)
}

fn memory_coordinator(temp: &tempfile::TempDir) -> Coordinator {
    Coordinator::new(
        Arc::new(MemoryStore::new()),
        Config::default(),
        HistoryLog::new(temp.path().join("history")),
    )
}

fn sqlite_coordinator(temp: &tempfile::TempDir) -> Coordinator {
    let store = SqliteStore::new(temp.path().join("store.db")).expect("store init");
    Coordinator::new(
        Arc::new(store),
        Config::default(),
        HistoryLog::new(temp.path().join("history")),
    )
}

fn meta(pid: u32, intent: &str) -> SessionMetadata {
    SessionMetadata {
        host: "remote.example".to_string(),
        pid,
        declared_intent: Some(intent.to_string()),
        ..SessionMetadata::default()
    }
}

fn hour() -> Duration {
    Duration::seconds(3600)
}

// Scenario A: B is blocked on A's file and succeeds on another one.
#[test]
fn blocked_session_can_take_alternative_resource() {
    let temp = tempfile::tempdir().unwrap();
    let coord = memory_coordinator(&temp);
    let now = instant("2026-01-31T09:00:00Z");

    coord.register_at("a", meta(1, "auth rework"), now).unwrap();
    coord.register_at("b", meta(2, "test cleanup"), now).unwrap();

    coord.acquire_at("auth.py", "a", hour(), Some("auth rework"), now).unwrap();

    let conflict = coord
        .acquire_at("auth.py", "b", hour(), None, now)
        .unwrap_err();
    assert_eq!(conflict.held_by, "a");
    assert_eq!(conflict.reason.as_deref(), Some("auth rework"));

    let lease = coord
        .acquire_at("tests/test_auth.py", "b", hour(), None, now)
        .unwrap();
    assert_eq!(lease.owner_session_id, "b");
}

// Scenario B: a crashed session self-heals once its heartbeat goes stale.
#[test]
fn crashed_session_is_reclaimed_after_timeout() {
    let temp = tempfile::tempdir().unwrap();
    let coord = memory_coordinator(&temp);
    let start = instant("2026-01-31T09:00:00Z");

    coord.register_at("a", meta(1, "auth rework"), start).unwrap();
    coord
        .acquire_at("auth.py", "a", Duration::seconds(100_000), None, start)
        .unwrap();
    // Crash: no release, no further heartbeats.

    let after_timeout = start + Duration::seconds(7201);
    coord.sweep_at(after_timeout).unwrap();

    assert!(coord.list_leases().unwrap().is_empty());
    let sessions = coord.list_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Archived);
}

// Scenario C: force-unlock removes a live lease and leaves an audit trail.
#[test]
fn force_unlock_removes_live_lease_and_logs_override() {
    let temp = tempfile::tempdir().unwrap();
    let coord = memory_coordinator(&temp);
    let now = instant("2026-01-31T09:00:00Z");

    coord.register_at("a", meta(1, "auth rework"), now).unwrap();
    coord.acquire_at("auth.py", "a", hour(), None, now).unwrap();

    let previous = coord.force_release_at("auth.py", "operator", now).unwrap();
    assert_eq!(previous.unwrap().owner_session_id, "a");
    assert!(coord.list_leases().unwrap().is_empty());

    let records = coord.history().read_window(now - Duration::seconds(1)).unwrap();
    let overrides: Vec<_> = records
        .iter()
        .filter_map(|record| match &record.event {
            HistoryEvent::ForcedOverride { previous_owner, .. } => Some(previous_owner.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(overrides, vec!["a".to_string()]);
}

#[test]
fn ttl_expiry_clears_lease_without_release() {
    let temp = tempfile::tempdir().unwrap();
    let coord = memory_coordinator(&temp);
    let start = instant("2026-01-31T09:00:00Z");

    coord
        .acquire_at("auth.py", "a", Duration::seconds(60), None, start)
        .unwrap();

    // At acquired_at + ttl + epsilon the lease must be gone from listings.
    coord.sweep_at(start + Duration::seconds(61)).unwrap();
    assert!(coord.list_leases().unwrap().is_empty());
}

#[test]
fn expired_lease_is_reclaimed_on_acquire_without_periodic_sweep() {
    let temp = tempfile::tempdir().unwrap();
    let coord = memory_coordinator(&temp);
    let start = instant("2026-01-31T09:00:00Z");

    coord
        .acquire_at("auth.py", "a", Duration::seconds(60), None, start)
        .unwrap();

    // No explicit sweep anywhere; the acquire itself reclaims.
    let lease = coord
        .acquire_at("auth.py", "b", hour(), None, start + Duration::seconds(120))
        .unwrap();
    assert_eq!(lease.owner_session_id, "b");
}

#[test]
fn gate_flow_over_sqlite_store() {
    let temp = tempfile::tempdir().unwrap();
    let coord = sqlite_coordinator(&temp);
    let now = instant("2026-01-31T09:00:00Z");

    coord.register_at("a", meta(1, "auth rework"), now).unwrap();
    coord.register_at("b", meta(2, "tests"), now).unwrap();

    assert!(matches!(
        coord.pre_operation_at("edit", "src/auth.py", "a", now),
        GateDecision::Allow { lease: Some(_) }
    ));

    match coord.pre_operation_at("edit", "src/auth.py", "b", now) {
        GateDecision::Block { conflict, busy } => {
            assert_eq!(conflict.held_by, "a");
            assert_eq!(busy.len(), 1);
        }
        other => panic!("expected block, got {:?}", other),
    }

    // Graceful shutdown frees the resource for the peer.
    coord.complete_at("a", now + Duration::seconds(30)).unwrap();
    assert!(matches!(
        coord.pre_operation_at("edit", "src/auth.py", "b", now + Duration::seconds(60)),
        GateDecision::Allow { lease: Some(_) }
    ));
}

#[test]
fn registration_reports_peer_intents_across_store_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let now = instant("2026-01-31T09:00:00Z");

    {
        let coord = sqlite_coordinator(&temp);
        coord.register_at("a", meta(1, "auth rework"), now).unwrap();
    }

    // A second process opens the same database file.
    let coord = sqlite_coordinator(&temp);
    let outcome = coord
        .register_at("b", meta(2, "test cleanup"), now + Duration::seconds(5))
        .unwrap();

    assert_eq!(outcome.peers.len(), 1);
    assert_eq!(outcome.peers[0].session_id, "a");
    assert_eq!(outcome.peers[0].declared_intent.as_deref(), Some("auth rework"));
}

#[test]
fn history_window_tracks_session_lifecycle() {
    let temp = tempfile::tempdir().unwrap();
    let coord = memory_coordinator(&temp);
    let start = instant("2026-01-31T09:00:00Z");

    coord.register_at("a", meta(1, "auth rework"), start).unwrap();
    coord.acquire_at("auth.py", "a", hour(), None, start).unwrap();
    coord.complete_at("a", start + hour()).unwrap();

    let records = coord.history().read_window(start).unwrap();
    let completed: Vec<_> = records
        .iter()
        .filter_map(|record| match &record.event {
            HistoryEvent::SessionCompleted {
                session_id,
                resources,
                ..
            } => Some((session_id.clone(), resources.len())),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![("a".to_string(), 1)]);
}
