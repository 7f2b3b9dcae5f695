//! Queue snapshot format and atomic state-file writes.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::job::{Job, QueueSummary};

/// File name of the snapshot inside the state directory.
pub const STATE_FILE_NAME: &str = "queue_state.json";

/// Snapshot format version written by this crate.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Durable image of the job set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Format version of the writer.
    pub version: u32,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Every job record, keyed by id.
    pub jobs: BTreeMap<String, Job>,
    /// Pending ids in dispatch order at save time.
    #[serde(default)]
    pub pending_order: Vec<String>,
    /// Ids of removed jobs, which stay reserved.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub retired_ids: BTreeSet<String>,
}

impl QueueSnapshot {
    /// Counts over the persisted records.
    pub fn summary(&self) -> QueueSummary {
        QueueSummary::from_jobs(self.jobs.values())
    }
}

/// `<state_dir>/queue_state.json`.
pub fn state_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILE_NAME)
}

/// Read the snapshot in `state_dir`, if one was ever written.
pub fn load_snapshot(state_dir: &Path) -> Result<Option<QueueSnapshot>, QueueError> {
    StateStore::new(state_dir).load()
}

#[derive(Debug, Clone)]
pub(crate) struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub(crate) fn new(state_dir: &Path) -> Self {
        Self {
            path: state_file_path(state_dir),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn load(&self) -> Result<Option<QueueSnapshot>, QueueError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(QueueError::CorruptState {
                    path: self.path.clone(),
                    reason: error.to_string(),
                });
            }
        };
        let snapshot: QueueSnapshot =
            serde_json::from_str(&raw).map_err(|error| QueueError::CorruptState {
                path: self.path.clone(),
                reason: error.to_string(),
            })?;
        if snapshot.version > SNAPSHOT_VERSION {
            tracing::warn!(
                path = %self.path.display(),
                version = snapshot.version,
                supported = SNAPSHOT_VERSION,
                "queue state written by a newer version; unknown fields are ignored"
            );
        }
        Ok(Some(snapshot))
    }

    pub(crate) fn save(&self, snapshot: &QueueSnapshot) -> Result<(), QueueError> {
        let content = serde_json::to_string_pretty(snapshot)?;
        atomic_write_text(&self.path, &content).map_err(|source| QueueError::Persistence {
            path: self.path.clone(),
            source,
        })
    }
}

/// Write text content atomically:
/// - ensure parent directory exists
/// - write to a temp file in the same directory
/// - fsync file + rename into place
fn atomic_write_text(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(STATE_FILE_NAME);
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let written = write_synced(&temp_path, content).and_then(|()| std::fs::rename(&temp_path, path));
    if written.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    written
}

fn write_synced(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}
