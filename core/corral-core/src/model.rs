//! Coordination records: sessions and leases.
//!
//! These are the typed in-memory forms; they cross the store boundary as
//! JSON snapshot attributes (see `store`). Timestamps are `DateTime<Utc>`
//! here and RFC3339 strings on the wire. Free-text fields (`reason`,
//! `declared_intent`) are opaque and never parsed for logic.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Owner name reported when the store cannot be consulted. `acquire` fails
/// closed with this placeholder rather than permitting an unguarded write.
pub const UNKNOWN_OWNER: &str = "unknown";

static ID_SANITIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Archived,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Archived => write!(f, "archived"),
        }
    }
}

/// One live worker process, as recorded in the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub host: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: SessionStatus,
    /// Unix start time of the worker process, recorded at registration.
    /// Lets same-host sweeps distinguish a recycled PID from the original.
    #[serde(default)]
    pub proc_started: Option<u64>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub declared_intent: Option<String>,
    #[serde(default)]
    pub priority: Option<u32>,
}

impl Session {
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_heartbeat)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.started_at)
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Caller-provided identity and intent for a new session.
#[derive(Debug, Clone, Default)]
pub struct SessionMetadata {
    pub host: String,
    pub pid: u32,
    pub proc_started: Option<u64>,
    pub working_directory: Option<String>,
    pub declared_intent: Option<String>,
    pub priority: Option<u32>,
}

/// Derives the globally unique session identity from process identity.
///
/// Host and PID are heuristic inputs only; correctness never depends on
/// them. The start timestamp disambiguates recycled PIDs.
pub fn derive_session_id(host: &str, pid: u32, started_at: DateTime<Utc>) -> String {
    let host = ID_SANITIZER.replace_all(host, "_");
    format!("{}-{}-{}", host, pid, started_at.timestamp())
}

/// Exclusive advisory claim on one named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub resource_id: String,
    pub owner_session_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.acquired_at)
    }

    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at.signed_duration_since(now)
    }
}

/// Why an `acquire` was refused. Carries enough context for the caller to
/// make a decision rather than retry blindly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub resource_id: String,
    /// Session currently holding the lease, or [`UNKNOWN_OWNER`] when the
    /// store could not be consulted.
    pub held_by: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Conflict {
    pub(crate) fn unknown(resource_id: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            held_by: UNKNOWN_OWNER.to_string(),
            reason: None,
            expires_at: None,
        }
    }

    pub(crate) fn from_lease(lease: &Lease) -> Self {
        Self {
            resource_id: lease.resource_id.clone(),
            held_by: lease.owner_session_id.clone(),
            reason: lease.reason.clone(),
            expires_at: Some(lease.expires_at),
        }
    }
}

/// What one sweep pass reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_leases: Vec<String>,
    pub archived_sessions: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_leases.is_empty() && self.archived_sessions.is_empty()
    }
}
