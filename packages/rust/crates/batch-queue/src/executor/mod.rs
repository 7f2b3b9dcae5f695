//! Executor plugin contract and the job-type registry.

mod progress;
mod registry;
mod traits;

pub(crate) use progress::ProgressSink;
pub use progress::ProgressReporter;
pub use registry::{ExecutorRegistry, RegistryError};
pub use traits::JobExecutor;
