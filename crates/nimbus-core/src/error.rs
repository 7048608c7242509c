//! Error taxonomy for the scheduling and task-execution core.
//!
//! Validation errors (`MalformedCondition`, `MalformedTrigger`,
//! `DuplicateName`, `MissingRequiredField`) propagate synchronously to the
//! caller that creates or edits a schedule. Execution errors inside a worker
//! never propagate to a caller: they are absorbed into the error marker and
//! retried or dropped per the task's backoff policy. A superseded polling
//! chain is not an error at all — see `RunOutcome` in nimbus-tasks.

pub type Result<T> = std::result::Result<T, NimbusError>;

#[derive(Debug, thiserror::Error)]
pub enum NimbusError {
    /// A condition failed validation at creation time. Never coerced.
    #[error("malformed condition: {0}")]
    MalformedCondition(String),

    /// A trigger definition failed validation, e.g. a crontab field that
    /// does not parse as a field-list expression.
    #[error("malformed trigger: {0}")]
    MalformedTrigger(String),

    /// A schedule with this name already exists for the owner.
    #[error("schedule name already exists: {0}")]
    DuplicateName(String),

    #[error("required parameter missing: {0}")]
    MissingRequiredField(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Any failure of the underlying opaque operation (provider call,
    /// script run, probe). Governed entirely by the backoff policy.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A stuck run was aborted by the soft time limit. Counts as a
    /// transient execution failure for backoff, logged distinctly.
    #[error("soft time limit exceeded")]
    SoftTimeLimit,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A persisted JSON column failed to round-trip.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl NimbusError {
    /// Whether this error counts against the failure backoff policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, NimbusError::Execution(_) | NimbusError::SoftTimeLimit)
    }
}
