use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::job::Job;

use super::traits::JobExecutor;

/// Resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Nothing is registered under the job's type.
    #[error("no executor registered for job type `{job_type}`")]
    NotFound {
        /// Type tag of the job.
        job_type: String,
    },

    /// The registered executor's `can_handle` rejected the job.
    #[error("executor for job type `{job_type}` refused job {job_id}")]
    Refused {
        /// Type tag of the job.
        job_type: String,
        /// The refused job.
        job_id: String,
    },
}

/// Maps job-type tags to executors.
///
/// Read-mostly: the engine resolves on every dispatch, writes happen only on
/// explicit (re-)registration.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn JobExecutor>>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

impl ExecutorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `job_type`, returning the executor it replaced.
    pub fn register<E: JobExecutor + 'static>(
        &self,
        job_type: impl Into<String>,
        executor: E,
    ) -> Option<Arc<dyn JobExecutor>> {
        self.register_shared(job_type, Arc::new(executor))
    }

    /// Register an already shared executor.
    pub fn register_shared(
        &self,
        job_type: impl Into<String>,
        executor: Arc<dyn JobExecutor>,
    ) -> Option<Arc<dyn JobExecutor>> {
        let job_type = job_type.into();
        tracing::info!(job_type = %job_type, "registered job executor");
        self.write().insert(job_type, executor)
    }

    /// Remove the executor for `job_type` and run its cleanup.
    pub fn unregister(&self, job_type: &str) -> bool {
        let removed = self.write().remove(job_type);
        match removed {
            Some(executor) => {
                run_cleanup(job_type, executor.as_ref());
                tracing::info!(job_type, "unregistered job executor");
                true
            }
            None => false,
        }
    }

    /// Executor for `job`, double-checked with [`JobExecutor::can_handle`].
    pub fn resolve(&self, job: &Job) -> Result<Arc<dyn JobExecutor>, RegistryError> {
        let executor = self
            .read()
            .get(job.job_type())
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                job_type: job.job_type().to_string(),
            })?;
        if executor.can_handle(job) {
            Ok(executor)
        } else {
            Err(RegistryError::Refused {
                job_type: job.job_type().to_string(),
                job_id: job.id().to_string(),
            })
        }
    }

    /// Whether an executor is registered for `job_type`.
    pub fn contains(&self, job_type: &str) -> bool {
        self.read().contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of registered job types.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Run `cleanup` on every registered executor.
    pub(crate) fn cleanup_all(&self) {
        let executors: Vec<(String, Arc<dyn JobExecutor>)> = self
            .read()
            .iter()
            .map(|(job_type, executor)| (job_type.clone(), Arc::clone(executor)))
            .collect();
        for (job_type, executor) in executors {
            run_cleanup(&job_type, executor.as_ref());
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn JobExecutor>>> {
        self.executors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn JobExecutor>>> {
        self.executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// Cleanup must never take the caller down.
fn run_cleanup(job_type: &str, executor: &dyn JobExecutor) {
    if catch_unwind(AssertUnwindSafe(|| executor.cleanup())).is_err() {
        tracing::error!(job_type, "executor cleanup panicked");
    }
}
