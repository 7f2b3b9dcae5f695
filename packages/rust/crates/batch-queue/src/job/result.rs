use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable machine-readable failure codes produced by the engine itself.
///
/// Executors may surface their own codes; those are recorded verbatim.
pub mod codes {
    /// No executor is registered (or willing) for the job type.
    pub const NO_EXECUTOR: &str = "NO_EXECUTOR";
    /// Executor did not return before the job timeout.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Executor panicked or returned a malformed result.
    pub const EXECUTOR_FAULT: &str = "EXECUTOR_FAULT";
    /// Job was cancelled by the caller.
    pub const CANCELLED: &str = "CANCELLED";
}

/// Free-form mapping used for result data and error details.
pub type FieldMap = Map<String, Value>;

/// Failure information attached to an unsuccessful [`JobResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Diagnostic context.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: FieldMap,
}

impl JobError {
    /// Error without details.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Map::new(),
        }
    }

    /// Attach one diagnostic field.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Outcome of one executor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job the result was produced for.
    pub job_id: String,
    /// Whether the run succeeded.
    pub success: bool,
    /// Result fields; present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FieldMap>,
    /// Failure; present only when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Wall time between dispatch and the recorded outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_secs: Option<f64>,
}

impl JobResult {
    /// Successful result carrying `data`.
    #[inline]
    pub fn success(job_id: impl Into<String>, data: FieldMap) -> Self {
        Self {
            job_id: job_id.into(),
            success: true,
            data: Some(data),
            error: None,
            execution_time_secs: None,
        }
    }

    /// Failed result carrying `error`.
    #[inline]
    pub fn failure(job_id: impl Into<String>, error: JobError) -> Self {
        Self {
            job_id: job_id.into(),
            success: false,
            data: None,
            error: Some(error),
            execution_time_secs: None,
        }
    }

    /// Error code of a failed result.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|error| error.code.as_str())
    }

    /// Check the success/data/error shape and the job id an executor returned.
    pub(crate) fn validate_for(&self, job_id: &str) -> Result<(), String> {
        if self.job_id != job_id {
            return Err(format!(
                "result carries job id `{}` but was produced for `{job_id}`",
                self.job_id
            ));
        }
        match (self.success, self.error.is_some(), self.data.is_some()) {
            (true, true, _) => Err("successful result carries an error".to_string()),
            (false, false, _) => Err("failed result carries no error".to_string()),
            (false, true, true) => Err("failed result carries result data".to_string()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::{JobError, JobResult};

    #[test]
    fn validate_rejects_mismatched_shapes() {
        assert!(JobResult::success("a", Map::new()).validate_for("a").is_ok());
        assert!(JobResult::success("a", Map::new()).validate_for("b").is_err());

        let mut bad = JobResult::failure("a", JobError::new("X", "boom"));
        bad.success = true;
        assert!(bad.validate_for("a").is_err());

        let mut silent = JobResult::failure("a", JobError::new("X", "boom"));
        silent.error = None;
        assert!(silent.validate_for("a").is_err());
    }

    #[test]
    fn empty_optional_fields_are_omitted_on_the_wire() {
        let json = serde_json::to_value(JobResult::failure("a", JobError::new("X", "boom")))
            .expect("serialization should succeed");
        assert!(json.get("data").is_none());
        assert!(json.get("execution_time_secs").is_none());
        assert!(json["error"].get("details").is_none());
    }
}
