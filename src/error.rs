use thiserror::Error;

/// Failure taxonomy for the scheduling core.
///
/// Infeasibility is deliberately absent: a day or horizon that cannot be
/// staffed is a normal outcome, reported through `feasible` flags and
/// deficit maps on the result types.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed people/tasks/store payloads, unparseable dates, or
    /// non-positive requirement counts. Never retried by the core.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The backing repository could not satisfy a read or write. Retry
    /// policy belongs to the caller.
    #[error("repository failure: {0}")]
    Repository(String),

    /// The caller's cancellation signal fired between solve steps.
    #[error("solve cancelled")]
    Cancelled,
}

impl SchedulerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        SchedulerError::InvalidInput(msg.into())
    }

    pub fn repository(msg: impl Into<String>) -> Self {
        SchedulerError::Repository(msg.into())
    }
}
