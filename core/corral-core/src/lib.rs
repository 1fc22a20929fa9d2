//! Core library for corral - cooperative coordination for concurrent
//! worker sessions sharing a filesystem.
//!
//! Sessions register in a shared coordination store, take time-bounded
//! advisory leases on named resources before mutating them, and reclaim
//! stale state cooperatively. The locking contract is advisory: nothing is
//! enforced at the OS level, and the acquire path is check-then-act against
//! the store rather than linearizable (see `lease`).
//!
//! Everything is wired through [`Coordinator`]: explicit store handle,
//! explicit config, no process-global state, so multiple coordinators can
//! run side by side in tests.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod gate;
pub mod history;
pub mod lease;
pub mod model;
pub mod policy;
pub mod process;
pub mod registry;
pub mod resource;
pub mod store;
pub mod sweep;

pub use config::{Config, ConflictAction, CoordHome};
pub use error::{CoordError, Result};
pub use gate::GateDecision;
pub use history::{HistoryEvent, HistoryLog, HistoryRecord};
pub use model::{
    derive_session_id, Conflict, Lease, Session, SessionMetadata, SessionStatus, SweepReport,
    UNKNOWN_OWNER,
};
pub use registry::RegisterOutcome;
pub use store::{CoordinationStore, MemoryStore, SqliteStore, StoreError};

use policy::Policy;

/// One coordination participant's view of the shared state.
///
/// Cheap to construct; holds no background threads. The heartbeat/sweep
/// ticker lives in the `corral-hook heartbeat-holder` process, not here.
pub struct Coordinator {
    store: Arc<dyn CoordinationStore>,
    config: Config,
    policy: Policy,
    history: HistoryLog,
}

impl Coordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, config: Config, history: HistoryLog) -> Self {
        let policy = Policy::from_config(&config);
        Self {
            store,
            config,
            policy,
            history,
        }
    }

    /// Opens the deployment described by `~/.corral` (or `CORRAL_HOME`):
    /// TOML config, SQLite store on the shared filesystem, history log.
    pub fn open_default() -> Result<Self> {
        let home = CoordHome::resolve()?;
        let config = Config::load(&home.config_file());
        let store_path = config
            .store_path
            .clone()
            .unwrap_or_else(|| home.store_file());
        let history_dir = config
            .history_dir
            .clone()
            .unwrap_or_else(|| home.history_dir());
        let store = SqliteStore::new(store_path)?;
        Ok(Self::new(
            Arc::new(store),
            config,
            HistoryLog::new(history_dir),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub(crate) fn policy(&self) -> &Policy {
        &self.policy
    }

    pub(crate) fn store(&self) -> &dyn CoordinationStore {
        self.store.as_ref()
    }
}
