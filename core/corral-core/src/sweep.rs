//! Liveness sweeper: stale-lease and stale-session reclamation.
//!
//! Runs on a fixed interval inside the heartbeat holder and opportunistically
//! before every acquire and status query, so correctness never depends on the
//! periodic task. Idempotent and safe to run concurrently from multiple
//! sessions: it only deletes records that are already logically expired, and
//! double-deletion is a no-op at the store.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use store_protocol::{lease_entity_name, session_entity_name};

use crate::error::Result;
use crate::history::HistoryEvent;
use crate::model::{Session, SessionStatus, SweepReport};
use crate::process;
use crate::store;
use crate::Coordinator;

impl Coordinator {
    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        // Pass 1: expired leases, whoever owns them.
        let leases = store::load_leases(self.store())?;
        let mut expired_names = Vec::new();
        for lease in &leases {
            if lease.is_expired(now) {
                expired_names.push(lease_entity_name(&lease.resource_id));
                report.expired_leases.push(lease.resource_id.clone());
                self.history().record_at(
                    HistoryEvent::LeaseExpired {
                        resource_id: lease.resource_id.clone(),
                        owner_session_id: lease.owner_session_id.clone(),
                    },
                    now,
                );
            }
        }
        if !expired_names.is_empty() {
            self.store().delete(&expired_names)?;
            info!(count = expired_names.len(), "Reclaimed expired leases");
        }

        // Pass 2: stale sessions. Their remaining (unexpired) leases are
        // released along with them.
        let local_host = process::local_hostname();
        let sessions = store::load_sessions(self.store())?;
        for session in sessions {
            if !session.is_active() || !self.is_stale(&session, &local_host, now) {
                continue;
            }

            let mut held = Vec::new();
            let mut held_names = Vec::new();
            for lease in &leases {
                if lease.owner_session_id == session.session_id && !lease.is_expired(now) {
                    held_names.push(lease_entity_name(&lease.resource_id));
                    held.push(lease.resource_id.clone());
                }
            }
            if !held_names.is_empty() {
                self.store().delete(&held_names)?;
            }

            let archived = Session {
                status: SessionStatus::Archived,
                ..session.clone()
            };
            store::append_session(self.store(), &archived)?;
            self.history().record_at(
                HistoryEvent::SessionArchived {
                    session_id: session.session_id.clone(),
                    last_heartbeat: session.last_heartbeat,
                    released_resources: held,
                },
                now,
            );
            info!(
                session_id = %session.session_id,
                heartbeat_age_secs = session.heartbeat_age(now).num_seconds(),
                "Archived stale session"
            );
            report.archived_sessions.push(session.session_id);
        }

        if report.is_empty() {
            debug!("Sweep found nothing to reclaim");
        }
        Ok(report)
    }

    /// Reaps archived/completed session records older than twice the session
    /// timeout so the store does not accumulate terminal entities forever.
    /// History keeps the durable trail.
    pub fn prune_terminal_sessions_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let grace = self.config().session_timeout() * 2;
        let sessions = store::load_sessions(self.store())?;
        let mut names = Vec::new();
        for session in sessions {
            if !session.is_active() && now.signed_duration_since(session.last_heartbeat) > grace {
                names.push(session_entity_name(&session.session_id));
            }
        }
        if !names.is_empty() {
            self.store().delete(&names)?;
            debug!(count = names.len(), "Pruned terminal session records");
        }
        Ok(names.len())
    }

    /// Heartbeat-age staleness, with a same-host shortcut: when the session
    /// was registered on this host and its PID is verifiably gone, archive it
    /// after a couple of missed beats instead of waiting out the full
    /// timeout. Cross-host sessions rely on heartbeat age alone.
    fn is_stale(&self, session: &Session, local_host: &str, now: DateTime<Utc>) -> bool {
        let age = session.heartbeat_age(now);
        if age > self.config().session_timeout() {
            return true;
        }
        session.host == local_host
            && age > self.config().heartbeat_interval() * 2
            && !process::is_pid_alive_verified(session.pid, session.proc_started)
    }
}
