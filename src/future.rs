//! The consumer-visible handle for a submitted task.
//!
//! A [`TaskFuture`] starts pending and transitions exactly once to fulfilled
//! or rejected. The transition is always performed by the consumer loop (the
//! result transformer runs there); awaiting the future merely observes it.

use crate::error::{Error, Rejection, Result};
use crate::types::TaskId;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A pending task result: fulfills with the transformed value or rejects
/// with a [`Rejection`]
///
/// Returned synchronously by [`Dispatcher::submit`](crate::Dispatcher::submit).
/// If the consumer loop terminates before the task resolves, awaiting yields
/// [`Error::LoopClosed`] rather than hanging.
#[derive(Debug)]
pub struct TaskFuture<T> {
    id: TaskId,
    rx: oneshot::Receiver<std::result::Result<T, Rejection>>,
}

impl<T> TaskFuture<T> {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<std::result::Result<T, Rejection>>) -> Self {
        Self { id, rx }
    }

    /// The identifier of the task behind this future
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T> Future for TaskFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(rejection))) => Poll::Ready(Err(Error::Rejected(rejection))),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::LoopClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
