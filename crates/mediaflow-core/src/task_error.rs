//! Job execution error types
//!
//! Lets a job handler tell the worker pool whether a failure is worth another
//! attempt (recoverable) or should fail the job immediately (unrecoverable).

use std::fmt;

/// Job execution error that can be either recoverable or unrecoverable
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// Failure that the broker must not retry, such as a payload that cannot be
    /// decoded or a source file that is missing from storage.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Failure that follows the job's retry policy.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    /// Returns true when `err` wraps a [`TaskError`] marked unrecoverable.
    /// Any other error is treated as recoverable.
    pub fn is_unrecoverable_error(err: &anyhow::Error) -> bool {
        err.downcast_ref::<TaskError>()
            .map(|te| !te.is_recoverable())
            .unwrap_or(false)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}
