//! Heartbeat holder daemon.
//!
//! Background process spawned by `start`. It keeps the session's liveness
//! record fresh while the worker process is alive and runs the periodic
//! reclamation sweep, so stale peers get cleaned up even when nobody else
//! is acquiring.
//!
//! ## Lifecycle
//!
//! 1. Spawned detached by the `start` command
//! 2. Heartbeats every `heartbeat_interval` while the worker PID is alive
//! 3. Sweeps every `sweep_interval`
//! 4. When the PID exits: completes the session (releases all leases)

use std::thread;
use std::time::{Duration, Instant};

use corral_core::process::is_pid_alive;
use corral_core::Coordinator;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub fn run(session_id: &str, pid: u32) {
    let coordinator = match Coordinator::open_default() {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Heartbeat holder cannot open coordinator");
            return;
        }
    };

    let heartbeat_every =
        Duration::from_secs(coordinator.config().heartbeat_interval_secs.max(1));
    let sweep_every = Duration::from_secs(coordinator.config().sweep_interval_secs.max(1));

    info!(
        session_id = %session_id,
        pid,
        heartbeat_secs = heartbeat_every.as_secs(),
        sweep_secs = sweep_every.as_secs(),
        "Heartbeat holder started"
    );

    coordinator.heartbeat(session_id);
    let mut last_beat = Instant::now();
    let mut last_sweep = Instant::now();

    while is_pid_alive(pid) {
        thread::sleep(POLL_INTERVAL);

        if last_beat.elapsed() >= heartbeat_every {
            coordinator.heartbeat(session_id);
            last_beat = Instant::now();
        }

        if last_sweep.elapsed() >= sweep_every {
            match coordinator.sweep() {
                Ok(report) if !report.is_empty() => {
                    info!(
                        expired_leases = report.expired_leases.len(),
                        archived_sessions = report.archived_sessions.len(),
                        "Periodic sweep reclaimed stale state"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Periodic sweep failed"),
            }
            if let Err(e) = coordinator.prune_terminal_sessions_at(chrono::Utc::now()) {
                debug!(error = %e, "Terminal session pruning failed");
            }
            last_sweep = Instant::now();
        }
    }

    // Worker exited without calling `end`; complete on its behalf.
    match coordinator.complete(session_id) {
        Ok(released) => {
            info!(
                session_id = %session_id,
                released = released.len(),
                "Worker exited; session completed by holder"
            );
        }
        Err(e) => {
            // Leases will still expire by TTL and the sweeper will archive
            // the session once heartbeats stop.
            error!(session_id = %session_id, error = %e, "Failed to complete session after worker exit");
        }
    }
}
