//! Job records, results, and the status state machine.

mod record;
mod result;
mod status;
mod summary;

pub(crate) use record::FailureOutcome;
pub use record::{DEFAULT_MAX_RETRIES, InvalidTransition, Job};
pub use result::{FieldMap, JobError, JobResult, codes};
pub use status::JobStatus;
pub use summary::QueueSummary;
