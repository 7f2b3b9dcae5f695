use serde::{Deserialize, Serialize};

/// Lifecycle status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the pending queue.
    Pending,
    /// Claimed by a worker; executor in flight.
    Running,
    /// Executor returned a successful result.
    Completed,
    /// Failed with the retry budget exhausted.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl JobStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns true if this status represents a terminal state.
    ///
    /// `Failed` is only terminal once retries are exhausted; a retried job never
    /// rests in `Failed`, it moves straight back to `Pending`.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits `self -> next`.
    ///
    /// `Failed -> Pending` is additionally gated on the retry budget by the
    /// job record itself.
    #[inline]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
                | (Self::Failed, Self::Pending)
        )
    }

    /// Stable lowercase name, identical to the serialized form.
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
