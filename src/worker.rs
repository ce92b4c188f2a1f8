//! Worker-side execution of a single work function.
//!
//! Runs on a blocking worker thread, never on the consumer loop. The worker
//! performs no retries: one work function, one terminal outcome.

use crate::error::Rejection;
use crate::progress::ProgressHandle;
use crate::types::{ErrorClass, ErrorSource, WorkOutcome};

/// Run one work function to completion on the current thread.
///
/// On failure the collaborator's last-error accessor is queried; if it yields
/// nothing, the task's configured default message is used. The outcome is
/// returned as data for the dispatcher to marshal to the consumer loop.
pub(crate) fn run_work<R>(
    work: impl FnOnce(&ProgressHandle) -> WorkOutcome<R>,
    handle: &ProgressHandle,
    error_source: &dyn ErrorSource,
    default_error: &str,
    class: ErrorClass,
) -> Result<R, Rejection> {
    match work(handle) {
        WorkOutcome::Success(value) => Ok(value),
        WorkOutcome::Failure => {
            let message = error_source
                .last_error()
                .unwrap_or_else(|| default_error.to_string());
            tracing::debug!(class = class.0, message = %message, "work function failed");
            Err(Rejection::new(message, class))
        }
    }
}
