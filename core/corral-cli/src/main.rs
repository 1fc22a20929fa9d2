//! corral: operator surface for the coordination store.
//!
//! Read-only and corrective commands over the shared state: active
//! sessions, current leases, force-unlock, on-demand sweep, and the
//! session history log. Exit code 0 on success, non-zero on internal
//! failure; `unlock` without `--force` exits 1 when it refuses.

use std::env;

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use corral_core::process::local_hostname;
use corral_core::{resource, Coordinator, HistoryEvent, Session};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "corral")]
#[command(about = "Coordination status and administration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List active sessions with their declared intents
    Status,

    /// List current leases with owner and time-to-expiry
    Locks,

    /// Release a lease regardless of owner (requires --force for live leases)
    Unlock {
        /// Resource path the lease was taken on
        resource: String,

        #[arg(long)]
        force: bool,
    },

    /// Run a reclamation sweep now
    Refresh,

    /// List completed and archived sessions from the history log
    History {
        /// Look-back window, e.g. 90m, 24h, 7d
        #[arg(long, default_value = "24h")]
        window: String,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let code = match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "corral command failed");
            eprintln!("error: {}", err);
            1
        }
    };
    std::process::exit(code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> Result<i32, String> {
    let coordinator = Coordinator::open_default().map_err(|e| e.to_string())?;
    match command {
        Commands::Status => status(&coordinator),
        Commands::Locks => locks(&coordinator),
        Commands::Unlock { resource, force } => unlock(&coordinator, &resource, force),
        Commands::Refresh => refresh(&coordinator),
        Commands::History { window } => history(&coordinator, &window),
    }
}

fn status(coordinator: &Coordinator) -> Result<i32, String> {
    sweep_quietly(coordinator);

    let now = Utc::now();
    let sessions = coordinator.list_active().map_err(|e| e.to_string())?;
    if sessions.is_empty() {
        println!("no active sessions");
        return Ok(0);
    }

    println!(
        "{:<40} {:>8} {:>10}  {}",
        "SESSION", "AGE", "LAST BEAT", "INTENT"
    );
    for session in &sessions {
        println!(
            "{:<40} {:>8} {:>10}  {}",
            session.session_id,
            fmt_duration(session.age(now)),
            fmt_duration(session.heartbeat_age(now)),
            describe_intent(session),
        );
    }
    Ok(0)
}

fn locks(coordinator: &Coordinator) -> Result<i32, String> {
    sweep_quietly(coordinator);

    let now = Utc::now();
    let leases = coordinator.list_leases().map_err(|e| e.to_string())?;
    if leases.is_empty() {
        println!("no leases held");
        return Ok(0);
    }

    println!(
        "{:<44} {:<40} {:>8} {:>10}  {}",
        "RESOURCE", "OWNER", "AGE", "EXPIRES", "REASON"
    );
    for lease in &leases {
        println!(
            "{:<44} {:<40} {:>8} {:>10}  {}",
            lease.resource_id,
            lease.owner_session_id,
            fmt_duration(lease.age(now)),
            fmt_duration(lease.ttl_remaining(now)),
            lease.reason.as_deref().unwrap_or("-"),
        );
    }
    Ok(0)
}

fn unlock(coordinator: &Coordinator, resource: &str, force: bool) -> Result<i32, String> {
    let now = Utc::now();
    let resource_id = resource::resource_id(resource);
    let current = coordinator
        .list_leases()
        .map_err(|e| e.to_string())?
        .into_iter()
        .find(|lease| lease.resource_id == resource_id);

    let Some(lease) = current else {
        println!("no lease on {}", resource_id);
        return Ok(0);
    };

    if !force && !lease.is_expired(now) {
        println!(
            "{} is held by {} (expires in {}); pass --force to override",
            resource_id,
            lease.owner_session_id,
            fmt_duration(lease.ttl_remaining(now)),
        );
        return Ok(1);
    }

    if lease.is_expired(now) {
        sweep_quietly(coordinator);
        println!("released {} (lease had already expired)", resource_id);
        return Ok(0);
    }

    let previous = coordinator
        .force_release(resource, &actor())
        .map_err(|e| e.to_string())?;
    match previous {
        Some(lease) => println!(
            "released {} (was held by {}, FORCED)",
            resource_id, lease.owner_session_id
        ),
        None => println!("no lease on {}", resource_id),
    }
    Ok(0)
}

fn refresh(coordinator: &Coordinator) -> Result<i32, String> {
    let report = coordinator.sweep().map_err(|e| e.to_string())?;
    let pruned = coordinator
        .prune_terminal_sessions_at(Utc::now())
        .map_err(|e| e.to_string())?;

    println!(
        "reclaimed {} expired lease(s), archived {} stale session(s), pruned {} old record(s)",
        report.expired_leases.len(),
        report.archived_sessions.len(),
        pruned,
    );
    for resource_id in &report.expired_leases {
        println!("  lease expired: {}", resource_id);
    }
    for session_id in &report.archived_sessions {
        println!("  session archived: {}", session_id);
    }

    let active = coordinator.list_active().map_err(|e| e.to_string())?;
    let leases = coordinator.list_leases().map_err(|e| e.to_string())?;
    println!(
        "now: {} active session(s), {} lease(s) held",
        active.len(),
        leases.len()
    );
    Ok(0)
}

fn history(coordinator: &Coordinator, window: &str) -> Result<i32, String> {
    let window = parse_window(window)?;
    let since = Utc::now() - window;
    let records = coordinator
        .history()
        .read_window(since)
        .map_err(|e| e.to_string())?;

    if records.is_empty() {
        println!("no history in the last {}", fmt_duration(window));
        return Ok(0);
    }

    for record in &records {
        let stamp = record.recorded_at.format("%Y-%m-%d %H:%M:%S");
        match &record.event {
            HistoryEvent::SessionCompleted {
                session_id,
                started_at,
                resources,
            } => {
                let duration = record.recorded_at.signed_duration_since(*started_at);
                println!(
                    "{}  completed  {} (ran {}, touched {} resource(s))",
                    stamp,
                    session_id,
                    fmt_duration(duration),
                    resources.len(),
                );
            }
            HistoryEvent::SessionArchived {
                session_id,
                released_resources,
                ..
            } => {
                println!(
                    "{}  archived   {} (stale; {} lease(s) released)",
                    stamp,
                    session_id,
                    released_resources.len(),
                );
            }
            HistoryEvent::LeaseExpired {
                resource_id,
                owner_session_id,
            } => {
                println!(
                    "{}  expired    {} (was held by {})",
                    stamp, resource_id, owner_session_id
                );
            }
            HistoryEvent::ForcedOverride {
                resource_id,
                previous_owner,
                actor,
            } => {
                println!(
                    "{}  FORCED     {} ({} overrode {})",
                    stamp, resource_id, actor, previous_owner
                );
            }
        }
    }
    Ok(0)
}

fn sweep_quietly(coordinator: &Coordinator) {
    if let Err(err) = coordinator.sweep() {
        tracing::warn!(error = %err, "Opportunistic sweep failed");
    }
}

fn actor() -> String {
    let user = env::var("USER").unwrap_or_else(|_| "operator".to_string());
    format!("{}@{}", user, local_hostname())
}

fn describe_intent(session: &Session) -> String {
    match (&session.declared_intent, &session.working_directory) {
        (Some(intent), _) => intent.clone(),
        (None, Some(dir)) => format!("(in {})", dir),
        (None, None) => "-".to_string(),
    }
}

/// Parses a look-back window like `90s`, `30m`, `24h`, `7d`.
fn parse_window(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = raw.split_at(raw.len().saturating_sub(1));
    let value: i64 = digits
        .parse()
        .map_err(|_| format!("invalid window: {}", raw))?;
    if value < 0 {
        return Err(format!("invalid window: {}", raw));
    }
    match unit {
        "s" => Ok(Duration::seconds(value)),
        "m" => Ok(Duration::minutes(value)),
        "h" => Ok(Duration::hours(value)),
        "d" => Ok(Duration::days(value)),
        _ => Err(format!(
            "invalid window: {} (expected a number with s/m/h/d suffix)",
            raw
        )),
    }
}

fn fmt_duration(duration: Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 0 {
        return "expired".to_string();
    }
    if secs < 60 {
        return format!("{}s", secs);
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{}m{:02}s", mins, secs % 60);
    }
    let hours = mins / 60;
    if hours < 48 {
        return format!("{}h{:02}m", hours, mins % 60);
    }
    format!("{}d{:02}h", hours / 24, hours % 24)
}
