//! Session start and end handlers.
//!
//! `start` registers the parent process (the actual worker) as a session,
//! prints the session id plus any concurrently active peers as JSON, and
//! spawns the detached heartbeat holder. `end` is the graceful shutdown
//! path: release every lease, mark the session completed.

use std::env;
use std::process::{Command, Stdio};

use chrono::Utc;
use corral_core::process::{get_process_start_time, local_hostname};
use corral_core::{derive_session_id, Coordinator, SessionMetadata};
use tracing::{info, warn};

pub fn start(
    intent: Option<String>,
    cwd: Option<String>,
    priority: Option<u32>,
    no_holder: bool,
) -> Result<(), String> {
    let coordinator = Coordinator::open_default().map_err(|e| e.to_string())?;

    // The hook is spawned by the worker; the parent is the session.
    let pid = get_ppid().unwrap_or_else(std::process::id);
    let host = local_hostname();
    let now = Utc::now();
    let session_id = derive_session_id(&host, pid, now);

    let working_directory = cwd.or_else(|| {
        env::current_dir()
            .ok()
            .map(|path| path.display().to_string())
    });

    let outcome = coordinator
        .register(
            &session_id,
            SessionMetadata {
                host,
                pid,
                proc_started: get_process_start_time(pid),
                working_directory,
                declared_intent: intent,
                priority,
            },
        )
        .map_err(|e| e.to_string())?;

    let peers: Vec<serde_json::Value> = outcome
        .peers
        .iter()
        .map(|peer| {
            serde_json::json!({
                "session_id": peer.session_id,
                "declared_intent": peer.declared_intent,
                "working_directory": peer.working_directory,
                "age_secs": peer.age(now).num_seconds(),
            })
        })
        .collect();

    println!(
        "{}",
        serde_json::json!({
            "session_id": outcome.session.session_id,
            "active_peers": peers,
        })
    );

    if no_holder {
        info!(session_id = %session_id, "Heartbeat holder disabled by flag");
        return Ok(());
    }
    spawn_holder(&session_id, pid)
}

pub fn end(session_id: &str) -> Result<(), String> {
    let coordinator = Coordinator::open_default().map_err(|e| e.to_string())?;
    let released = coordinator.complete(session_id).map_err(|e| e.to_string())?;
    println!(
        "{}",
        serde_json::json!({
            "session_id": session_id,
            "released": released,
        })
    );
    Ok(())
}

fn spawn_holder(session_id: &str, pid: u32) -> Result<(), String> {
    let exe = env::current_exe().map_err(|e| format!("Failed to locate own binary: {}", e))?;
    let child = Command::new(exe)
        .args([
            "heartbeat-holder",
            "--session-id",
            session_id,
            "--pid",
            &pid.to_string(),
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match child {
        Ok(child) => {
            info!(
                session_id = %session_id,
                holder_pid = child.id(),
                "Spawned heartbeat holder"
            );
            Ok(())
        }
        Err(e) => {
            // Registration already succeeded; a missing holder only means
            // the session relies on the TTL margin instead of heartbeats.
            warn!(session_id = %session_id, error = %e, "Failed to spawn heartbeat holder");
            Ok(())
        }
    }
}

fn get_ppid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getppid() is a simple syscall that returns the parent
        // process ID. It has no failure modes.
        Some(unsafe { libc::getppid() } as u32)
    }
    #[cfg(not(unix))]
    {
        None
    }
}
