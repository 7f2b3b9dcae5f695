//! Error types for queue persistence and recovery.
//!
//! Job-level failures never surface here; they are recorded on the job as a
//! [`crate::JobError`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the job manager.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Checkpoint could not be written. In-memory state is intact.
    #[error("failed to persist queue state to {path}: {source}")]
    Persistence {
        /// State file being written.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// Persisted state exists but cannot be read back.
    #[error("queue state at {path} is unreadable: {reason}")]
    CorruptState {
        /// State file that failed to load.
        path: PathBuf,
        /// Read or parse failure.
        reason: String,
    },

    /// Snapshot serialization failed.
    #[error("failed to serialize queue state: {0}")]
    Serialize(#[from] serde_json::Error),
}
