//! Job manager: owns the job set, persists it, and drives the engine.

pub(crate) mod book;
mod core;
mod events;
mod persistence;
mod stats;
pub(crate) mod table;

pub use self::core::JobManager;
pub use events::{JobEvent, JobEventKind};
pub use persistence::{
    QueueSnapshot, SNAPSHOT_VERSION, STATE_FILE_NAME, load_snapshot, state_file_path,
};
pub use stats::{ErrorStatistics, PerformanceStats};
