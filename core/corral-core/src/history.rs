//! Append-only coordination history.
//!
//! One JSONL file per UTC date under the history directory. The log is a
//! side record for `history` queries and audits; it is never authoritative
//! for correctness, so writes are best-effort and failures only warn.

use std::io::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{CoordError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    SessionCompleted {
        session_id: String,
        started_at: DateTime<Utc>,
        /// Resources the session still held at completion.
        resources: Vec<String>,
    },
    SessionArchived {
        session_id: String,
        last_heartbeat: DateTime<Utc>,
        released_resources: Vec<String>,
    },
    LeaseExpired {
        resource_id: String,
        owner_session_id: String,
    },
    ForcedOverride {
        resource_id: String,
        previous_owner: String,
        actor: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

#[derive(Debug, Clone)]
pub struct HistoryLog {
    dir: PathBuf,
}

impl HistoryLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Appends one record to today's partition. Best-effort: failures warn
    /// and are swallowed so history never blocks coordination.
    pub fn record(&self, event: HistoryEvent) {
        self.record_at(event, Utc::now());
    }

    pub fn record_at(&self, event: HistoryEvent, now: DateTime<Utc>) {
        let record = HistoryRecord {
            recorded_at: now,
            event,
        };
        if let Err(err) = self.append(&record) {
            warn!(error = %err, "Failed to append history record");
        }
    }

    fn append(&self, record: &HistoryRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|source| CoordError::Io {
            context: format!("creating history dir {}", self.dir.display()),
            source,
        })?;

        let path = self.partition_path(record.recorded_at);
        let line = serde_json::to_string(record).map_err(|source| CoordError::Json {
            context: "serializing history record".to_string(),
            source,
        })?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| CoordError::Io {
                context: format!("opening history partition {}", path.display()),
                source,
            })?;
        writeln!(file, "{}", line).map_err(|source| CoordError::Io {
            context: format!("appending to {}", path.display()),
            source,
        })
    }

    fn partition_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.jsonl", at.format("%Y-%m-%d")))
    }

    /// Reads all records with `recorded_at >= since`, oldest first.
    /// Unparseable lines are skipped; partitions whose date is entirely
    /// before the window are not opened.
    pub fn read_window(&self, since: DateTime<Utc>) -> Result<Vec<HistoryRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let cutoff_partition = format!("{}.jsonl", since.format("%Y-%m-%d"));
        let mut records = Vec::new();

        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable history entry");
                    continue;
                }
            };
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.ends_with(".jsonl") {
                continue;
            }
            // Partition names sort lexicographically by date.
            if file_name.as_str() < cutoff_partition.as_str() {
                continue;
            }

            let content =
                fs::read_to_string(entry.path()).map_err(|source| CoordError::Io {
                    context: format!("reading history partition {}", entry.path().display()),
                    source,
                })?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<HistoryRecord>(line) {
                    Ok(record) if record.recorded_at >= since => records.push(record),
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "Skipping unparseable history line");
                    }
                }
            }
        }

        records.sort_by_key(|record| record.recorded_at);
        Ok(records)
    }
}
