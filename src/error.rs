//! Error types for task-bridge
//!
//! Failures from work functions never cross the worker/consumer boundary as
//! panics; they are captured as a [`Rejection`] on the worker thread and
//! delivered through the task's future on the consumer loop.

use crate::types::ErrorClass;
use thiserror::Error;

/// Result type alias for task-bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failure record for a task
///
/// Carries a human-readable message (from the collaborator's last-error
/// accessor, or the task's configured default) and the caller-supplied
/// classification tag.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Rejection {
    /// Human-readable failure message
    pub message: String,
    /// Caller-supplied error classification tag
    pub class: ErrorClass,
}

impl Rejection {
    /// Create a new rejection record
    pub fn new(message: impl Into<String>, class: ErrorClass) -> Self {
        Self {
            message: message.into(),
            class,
        }
    }
}

/// Main error type for task-bridge
#[derive(Debug, Error)]
pub enum Error {
    /// The work function failed; the task's future was rejected
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// The consumer loop terminated before the task resolved
    #[error("consumer loop terminated before the task resolved")]
    LoopClosed,
}

impl Error {
    /// The rejection record, when this error is a task rejection
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Error::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}
