//! batch-queue - persistent job queue with a bounded worker pool
//!
//! Accepts typed jobs, dispatches each to the executor registered for its
//! type, tracks progress and terminal results, and checkpoints the job set
//! so an interrupted process picks up where it left off.
//!
//! # Architecture
//!
//! ```text
//! batch-queue/src/
//! ├── lib.rs        # Re-exports (this file)
//! ├── error.rs      # QueueError enum
//! ├── job/          # Job record, results, status state machine, summary
//! ├── executor/     # JobExecutor trait, progress reporter, registry
//! ├── engine/       # Dispatcher + bounded worker pool
//! ├── manager/      # JobManager façade, persistence, lifecycle events
//! └── config/       # JobManagerConfig + YAML settings loader
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use batch_queue::{ExecutorRegistry, JobManager, JobManagerConfig};
//!
//! let registry = Arc::new(ExecutorRegistry::new());
//! registry.register("render", RenderExecutor::default());
//! let manager = JobManager::new(JobManagerConfig::default(), registry)?;
//! manager.add_job(manager.create_job("render", "meshes/chair.stl"))?;
//! manager.start_processing();
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

mod config;
mod engine;
mod error;
mod executor;
mod job;
mod manager;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use async_trait::async_trait;

pub use config::{
    JobManagerConfig, QueueSection, QueueSettings, RequeuePolicy, RetryBackoff,
    default_state_dir, load_queue_settings, load_queue_settings_from_paths,
    queue_settings_paths, set_config_home_override,
};
pub use error::QueueError;
pub use executor::{ExecutorRegistry, JobExecutor, ProgressReporter, RegistryError};
pub use job::{
    DEFAULT_MAX_RETRIES, FieldMap, InvalidTransition, Job, JobError, JobResult, JobStatus,
    QueueSummary, codes,
};
pub use manager::{
    ErrorStatistics, JobEvent, JobEventKind, JobManager, PerformanceStats, QueueSnapshot,
    SNAPSHOT_VERSION, STATE_FILE_NAME, load_snapshot, state_file_path,
};
