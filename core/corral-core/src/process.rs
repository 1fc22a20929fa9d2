//! Process identity helpers for stale-detection heuristics.
//!
//! Host and PID are advisory inputs only (the model tolerates lying or
//! recycled values); they let the sweeper reclaim same-host sessions faster
//! than the heartbeat timeout would.

use std::cell::RefCell;
use std::env;

// Thread-local sysinfo cache. Per-PID refresh is O(1) instead of scanning
// all processes; liveness checks run inside every sweep.
thread_local! {
    static SYSTEM_CACHE: RefCell<Option<sysinfo::System>> = const { RefCell::new(None) };
}

pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: kill with signal 0 performs permission/existence checks
        // only; it never delivers a signal.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Get the start time of a process (Unix timestamp).
/// Returns None if the process doesn't exist or can't be queried.
pub fn get_process_start_time(pid: u32) -> Option<u64> {
    use sysinfo::{Pid, ProcessRefreshKind, System};

    SYSTEM_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let sys = cache.get_or_insert_with(System::new);

        let sysinfo_pid = Pid::from(pid as usize);
        sys.refresh_process_specifics(sysinfo_pid, ProcessRefreshKind::new());
        sys.process(sysinfo_pid).map(|process| process.start_time())
    })
}

/// Verify that a PID is alive AND was started when the caller expects
/// (±2 seconds tolerance). Guards against recycled PIDs. With no expected
/// start time (legacy records) this degrades to a plain existence check.
pub fn is_pid_alive_verified(pid: u32, expected_start_unix: Option<u64>) -> bool {
    if !is_pid_alive(pid) {
        return false;
    }
    let Some(expected) = expected_start_unix else {
        return true;
    };
    match get_process_start_time(pid) {
        Some(actual) => actual.abs_diff(expected) <= 2,
        // Alive but unreadable (e.g. permissions): assume it is the same
        // process rather than reclaiming a live session.
        None => true,
    }
}

/// Best-effort local hostname for session identity.
pub fn local_hostname() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        // SAFETY: gethostname writes at most buf.len() bytes and
        // NUL-terminates on success.
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if rc == 0 {
            let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
            if let Ok(name) = std::str::from_utf8(&buf[..end]) {
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
    }
    env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn absurd_pid_is_dead() {
        assert!(!is_pid_alive(99_999_999));
    }

    #[test]
    fn verified_liveness_rejects_wrong_start_time() {
        let pid = std::process::id();
        if let Some(actual) = get_process_start_time(pid) {
            assert!(is_pid_alive_verified(pid, Some(actual)));
            assert!(!is_pid_alive_verified(pid, Some(actual - 3600)));
        }
        assert!(is_pid_alive_verified(pid, None));
    }

    #[test]
    fn hostname_is_nonempty() {
        assert!(!local_hostname().is_empty());
    }
}
