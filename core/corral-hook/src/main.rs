//! corral-hook: session lifecycle hooks for coordinated worker processes.
//!
//! Small binary invoked by the host process around its work loop:
//!
//! - `start`: registers the session and spawns the heartbeat holder
//! - `gate`: pre-operation check, reads JSON from stdin (exit 2 = blocked)
//! - `end`: graceful shutdown, releases leases and completes the session
//! - `heartbeat-holder`: background liveness daemon (spawned internally)

mod gate;
mod heartbeat_holder;
mod logging;
mod session;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "corral-hook")]
#[command(about = "Session lifecycle hooks for corral coordination")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register this session and report other active sessions
    Start {
        /// What this session intends to work on (free text, shown to peers)
        #[arg(long)]
        intent: Option<String>,

        /// Working directory to record (defaults to the current directory)
        #[arg(long)]
        cwd: Option<String>,

        /// Priority for optional preemption (higher wins)
        #[arg(long)]
        priority: Option<u32>,

        /// Do not spawn the background heartbeat holder
        #[arg(long)]
        no_holder: bool,
    },

    /// Pre-operation gate: reads a JSON event from stdin, exit 2 = blocked
    Gate,

    /// Release all leases and mark the session completed
    End {
        #[arg(long)]
        session_id: String,
    },

    /// Heartbeat holder daemon (spawned by the start command)
    HeartbeatHolder {
        #[arg(long)]
        session_id: String,

        /// Worker process PID to monitor
        #[arg(long)]
        pid: u32,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            intent,
            cwd,
            priority,
            no_holder,
        } => {
            if let Err(e) = session::start(intent, cwd, priority, no_holder) {
                tracing::error!(error = %e, "corral-hook start failed");
                std::process::exit(1);
            }
        }
        Commands::Gate => {
            std::process::exit(gate::run());
        }
        Commands::End { session_id } => {
            if let Err(e) = session::end(&session_id) {
                tracing::error!(error = %e, "corral-hook end failed");
                std::process::exit(1);
            }
        }
        Commands::HeartbeatHolder { session_id, pid } => {
            heartbeat_holder::run(&session_id, pid);
        }
    }
}
