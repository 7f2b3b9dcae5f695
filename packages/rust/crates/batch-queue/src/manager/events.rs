use serde::Serialize;

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Accepted into the pending queue.
    Added,
    /// Claimed by a worker.
    Started,
    /// Executor reported progress.
    Progress {
        /// Stored fraction after clamping.
        fraction: f64,
        /// Status line from the executor.
        message: String,
    },
    /// Finished successfully.
    Completed,
    /// Failed attempt with budget left.
    Retrying {
        /// The new retry count.
        attempt: u32,
    },
    /// Terminal failure.
    Failed {
        /// Error code of the last attempt.
        code: String,
    },
    /// Cancelled by the caller.
    Cancelled,
    /// Dropped from the job set.
    Removed,
}

impl JobEventKind {
    /// Stable name used in log fields.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Started => "started",
            Self::Progress { .. } => "progress",
            Self::Completed => "completed",
            Self::Retrying { .. } => "retrying",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
            Self::Removed => "removed",
        }
    }
}

/// Lifecycle notification broadcast by the job manager.
///
/// Delivery is best-effort: a lagging subscriber loses the oldest events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    /// Job the event is about.
    pub job_id: String,
    /// What happened.
    #[serde(flatten)]
    pub kind: JobEventKind,
}

impl JobEvent {
    pub(crate) fn new(job_id: impl Into<String>, kind: JobEventKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
        }
    }
}
