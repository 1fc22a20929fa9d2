//! File logging for the hook binary.
//!
//! Hook stdout must stay clean JSON for the host process, so diagnostics go
//! to a daily-rolled file under the corral logs directory. Falls back to
//! stderr when no home can be resolved.

use corral_core::CoordHome;
use fs_err as fs;
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "CORRAL_DEBUG_LOG";

fn filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

pub fn init() -> Option<WorkerGuard> {
    let log_dir = CoordHome::resolve().ok().map(|home| home.logs_dir());

    if let Some(dir) = log_dir {
        if fs::create_dir_all(&dir).is_ok() {
            let appender = tracing_appender::rolling::daily(dir, "corral-hook.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(writer)
                .with_ansi(false)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .init();
    None
}
