//! Session registry: registration, heartbeats, and graceful completion.
//!
//! Heartbeats are fail-soft: a missed store write degrades liveness
//! tracking (the TTL margin absorbs it) but never crashes or blocks the
//! host process.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::history::HistoryEvent;
use crate::model::{Session, SessionMetadata, SessionStatus};
use crate::store;
use crate::Coordinator;

/// Result of registering: the session record plus every other concurrently
/// active session, purely informational for the caller.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub session: Session,
    pub peers: Vec<Session>,
}

impl Coordinator {
    /// Creates (or refreshes) the session record. Idempotent on the same
    /// `session_id`: re-registering an active session only bumps its
    /// heartbeat.
    pub fn register(&self, session_id: &str, meta: SessionMetadata) -> Result<RegisterOutcome> {
        self.register_at(session_id, meta, Utc::now())
    }

    pub fn register_at(
        &self,
        session_id: &str,
        meta: SessionMetadata,
        now: DateTime<Utc>,
    ) -> Result<RegisterOutcome> {
        let existing = store::find_session(self.store(), session_id)?;
        let session = match existing {
            Some(mut session) if session.is_active() => {
                session.last_heartbeat = now;
                store::append_session(self.store(), &session)?;
                debug!(session_id = %session_id, "Session already registered; refreshed heartbeat");
                session
            }
            _ => {
                let session = Session {
                    session_id: session_id.to_string(),
                    host: meta.host,
                    pid: meta.pid,
                    started_at: now,
                    last_heartbeat: now,
                    status: SessionStatus::Active,
                    proc_started: meta.proc_started,
                    working_directory: meta.working_directory,
                    declared_intent: meta.declared_intent,
                    priority: meta.priority,
                };
                store::put_session(self.store(), &session)?;
                info!(
                    session_id = %session_id,
                    host = %session.host,
                    pid = session.pid,
                    "Session registered"
                );
                session
            }
        };

        let peers = self
            .list_active()?
            .into_iter()
            .filter(|peer| peer.session_id != session_id)
            .collect();

        Ok(RegisterOutcome { session, peers })
    }

    /// Updates `last_heartbeat`. Never fails: store trouble is logged and
    /// the next beat (or the TTL margin) covers the gap.
    pub fn heartbeat(&self, session_id: &str) {
        self.heartbeat_at(session_id, Utc::now());
    }

    pub fn heartbeat_at(&self, session_id: &str, now: DateTime<Utc>) {
        match store::find_session(self.store(), session_id) {
            Ok(Some(mut session)) if session.is_active() => {
                session.last_heartbeat = now;
                if let Err(err) = store::append_session(self.store(), &session) {
                    warn!(session_id = %session_id, error = %err, "Failed to write heartbeat; skipping");
                }
            }
            Ok(Some(session)) => {
                debug!(
                    session_id = %session_id,
                    status = %session.status,
                    "Skipping heartbeat for non-active session"
                );
            }
            Ok(None) => {
                debug!(session_id = %session_id, "Skipping heartbeat for unknown session");
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "Store unreachable; skipping heartbeat");
            }
        }
    }

    /// All sessions currently marked active.
    pub fn list_active(&self) -> Result<Vec<Session>> {
        let sessions = store::load_sessions(self.store())?;
        Ok(sessions.into_iter().filter(Session::is_active).collect())
    }

    /// Every session record still present in the store, any status.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(store::load_sessions(self.store())?)
    }

    /// Graceful shutdown: releases every lease the session holds, then
    /// marks it completed. Returns the released resource ids.
    pub fn complete(&self, session_id: &str) -> Result<Vec<String>> {
        self.complete_at(session_id, Utc::now())
    }

    pub fn complete_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let released = self.release_all(session_id)?;

        match store::find_session(self.store(), session_id)? {
            Some(mut session) if session.is_active() => {
                session.status = SessionStatus::Completed;
                session.last_heartbeat = now;
                store::append_session(self.store(), &session)?;
                self.history().record_at(
                    HistoryEvent::SessionCompleted {
                        session_id: session_id.to_string(),
                        started_at: session.started_at,
                        resources: released.clone(),
                    },
                    now,
                );
                info!(
                    session_id = %session_id,
                    released = released.len(),
                    "Session completed"
                );
            }
            Some(session) => {
                debug!(
                    session_id = %session_id,
                    status = %session.status,
                    "Session already terminal; nothing to complete"
                );
            }
            None => {
                warn!(session_id = %session_id, "Completing unknown session; nothing recorded");
            }
        }

        Ok(released)
    }
}
