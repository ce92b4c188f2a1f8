//! Core types for task-bridge

use crate::progress::ProgressSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Unique identifier for a submitted task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl PartialEq<u64> for TaskId {
    fn eq(&self, other: &u64) -> bool {
        self.0 == *other
    }
}

impl PartialEq<TaskId> for u64 {
    fn eq(&self, other: &TaskId) -> bool {
        *self == other.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Caller-supplied error classification tag
///
/// Carried verbatim on a [`Rejection`](crate::error::Rejection); never inferred
/// from the message text. Hosts typically map these to their own error domains
/// (e.g. libgit2-style error class codes).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ErrorClass(pub i32);

impl ErrorClass {
    /// Create a new ErrorClass
    pub fn new(class: i32) -> Self {
        Self(class)
    }

    /// Get the inner i32 value
    pub fn get(&self) -> i32 {
        self.0
    }
}

impl From<i32> for ErrorClass {
    fn from(class: i32) -> Self {
        Self(class)
    }
}

impl From<ErrorClass> for i32 {
    fn from(class: ErrorClass) -> Self {
        class.0
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a work function
///
/// `Failure` carries no payload of its own; the worker queries the task's
/// [`ErrorSource`] for a structured message and falls back to the task's
/// configured default string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkOutcome<R> {
    /// The work function produced a value
    Success(R),
    /// The work function failed; consult the error source
    Failure,
}

impl<R> From<Option<R>> for WorkOutcome<R> {
    fn from(value: Option<R>) -> Self {
        match value {
            Some(v) => WorkOutcome::Success(v),
            None => WorkOutcome::Failure,
        }
    }
}

/// Collaborator-provided "last error" accessor
///
/// Queried by the worker when a work function signals failure, mirroring
/// native libraries that stash their most recent error in thread state.
/// Implementations must be callable from the worker thread.
pub trait ErrorSource: Send + Sync {
    /// The most recent structured error message, if any
    fn last_error(&self) -> Option<String>;
}

/// Default [`ErrorSource`] with no error state
///
/// Tasks that use it always reject with their configured default message.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLastError;

impl ErrorSource for NoLastError {
    fn last_error(&self) -> Option<String> {
        None
    }
}

/// Progress sink callback, invoked on the consumer loop with each drained snapshot
pub type ProgressSink = Box<dyn FnMut(ProgressSnapshot) + Send>;

/// Per-submission options: default error, classification tag, optional
/// progress sink, and error source
///
/// The default error message is used when the work function fails without a
/// structured error from the [`ErrorSource`].
pub struct TaskOptions {
    pub(crate) default_error: String,
    pub(crate) class: ErrorClass,
    pub(crate) progress_sink: Option<ProgressSink>,
    pub(crate) error_source: Arc<dyn ErrorSource>,
}

impl TaskOptions {
    /// Create options with a default error message and classification tag
    pub fn new(default_error: impl Into<String>, class: ErrorClass) -> Self {
        Self {
            default_error: default_error.into(),
            class,
            progress_sink: None,
            error_source: Arc::new(NoLastError),
        }
    }

    /// Register a progress sink, invoked on the consumer loop zero or more times
    ///
    /// Several rapid worker-side updates may coalesce into a single snapshot;
    /// sinks must not assume one invocation per mutation, only that every
    /// queued message eventually appears in some snapshot.
    pub fn with_progress_sink(mut self, sink: impl FnMut(ProgressSnapshot) + Send + 'static) -> Self {
        self.progress_sink = Some(Box::new(sink));
        self
    }

    /// Register the collaborator error source queried on failure
    pub fn with_error_source(mut self, source: impl ErrorSource + 'static) -> Self {
        self.error_source = Arc::new(source);
        self
    }
}

impl std::fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOptions")
            .field("default_error", &self.default_error)
            .field("class", &self.class)
            .field("progress_sink", &self.progress_sink.is_some())
            .finish_non_exhaustive()
    }
}
