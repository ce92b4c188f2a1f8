//! Task submission and the worker-to-consumer bridge.
//!
//! The [`Dispatcher`] hands work functions to a blocking worker pool and
//! multiplexes their progress and completion onto one [`ConsumerLoop`]. All
//! user-supplied consumer code (progress sinks and result transformers)
//! runs on that loop, one turn at a time, so it never races other
//! consumer-side code. Worker-to-consumer traffic is notify-and-pull: workers
//! send lightweight typed messages carrying a [`TaskId`], and the loop pulls
//! the latest snapshot from the task's tracker.

use crate::config::DispatcherConfig;
use crate::error::{Error, Rejection, Result};
use crate::future::TaskFuture;
use crate::progress::{MessageLimit, ProgressHandle, ProgressTracker};
use crate::types::{ProgressSink, TaskId, TaskOptions, WorkOutcome};
use crate::worker;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;


/// Deferred resolution body, built typed at the submission site and invoked
/// untyped on the consumer loop
pub(crate) type ResolveFn = Box<dyn FnOnce() + Send>;

/// Messages delivered into the consumer loop
///
/// Progress notifications carry only the task id; the loop pulls the actual
/// data from the tracker, which is what lets rapid updates coalesce.
pub(crate) enum LoopMessage {
    /// A task's tracker was mutated; pull a snapshot
    Progress(TaskId),
    /// A task's work function returned; flush progress, then resolve
    Complete {
        /// The finished task
        id: TaskId,
        /// Runs the result transformer and resolves the future
        resolve: ResolveFn,
    },
    /// No-op, sent purely to force a scheduling pass
    Poke,
    /// Stop accepting work and exit once the task table drains
    Shutdown,
}

/// One live task's consumer-side state
struct TaskEntry {
    /// The task's progress tracker (shared with its worker)
    tracker: Arc<ProgressTracker>,
    /// Progress sink, taken out of the entry while it runs so user code
    /// never executes under the task-table lock
    sink: Option<ProgressSink>,
}

/// State shared between the dispatcher, its supervisors, and the consumer loop
///
/// Deliberately holds no sender for the loop channel: the senders live in
/// [`Dispatcher`], the per-task trackers, and the supervisors, so the loop
/// observes channel closure once all of those are gone.
struct Shared {
    /// Live tasks, keyed by id; entries are removed at terminal resolution
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    /// Next task id
    next_id: AtomicU64,
    /// Cleared during shutdown; submissions are rejected once false
    accepting_new: AtomicBool,
    /// Worker-slot gate when max_concurrent_tasks is configured
    concurrent_limit: Option<Arc<Semaphore>>,
    /// Message-queue bounds applied to every task's tracker
    message_limit: MessageLimit,
}

fn lock_tasks(shared: &Shared) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
    shared.tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Submits tasks to the worker pool and relays their progress and completion
/// to the consumer loop
///
/// Cloneable; all clones share one task table and one consumer loop.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    loop_tx: UnboundedSender<LoopMessage>,
}

impl Dispatcher {
    /// Create a dispatcher and the consumer loop it feeds
    ///
    /// The caller decides where the loop runs, typically spawned onto the
    /// host runtime via `tokio::spawn(consumer.run())`.
    pub fn new(config: DispatcherConfig) -> (Dispatcher, ConsumerLoop) {
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let message_limit = match config.max_pending_messages {
            Some(capacity) => MessageLimit::bounded(capacity, config.overflow_policy),
            None => MessageLimit::unbounded(),
        };
        let shared = Arc::new(Shared {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            accepting_new: AtomicBool::new(true),
            concurrent_limit: config
                .max_concurrent_tasks
                .map(|slots| Arc::new(Semaphore::new(slots))),
            message_limit,
        });
        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            loop_tx,
        };
        let consumer = ConsumerLoop {
            shared,
            rx: loop_rx,
        };
        (dispatcher, consumer)
    }

    /// Submit a work function to the worker pool
    ///
    /// Returns a pending [`TaskFuture`] immediately; the work function runs to
    /// completion on a blocking worker thread. `transform` is invoked exactly
    /// once, on the consumer loop, only on success. Progress sinks registered
    /// in `options` are likewise invoked only on the consumer loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown) has
    /// been called.
    pub fn submit<R, T, W, F>(
        &self,
        work: W,
        transform: F,
        options: TaskOptions,
    ) -> Result<TaskFuture<T>>
    where
        R: Send + 'static,
        T: Send + 'static,
        W: FnOnce(&ProgressHandle) -> WorkOutcome<R> + Send + 'static,
        F: FnOnce(R) -> T + Send + 'static,
    {
        if !self.shared.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let TaskOptions {
            default_error,
            class,
            progress_sink,
            error_source,
        } = options;

        let id = TaskId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let tracker = Arc::new(ProgressTracker::new(
            id,
            self.loop_tx.clone(),
            self.shared.message_limit,
        ));
        let (done_tx, done_rx) = oneshot::channel();

        {
            let mut tasks = lock_tasks(&self.shared);
            tasks.insert(
                id,
                TaskEntry {
                    tracker: Arc::clone(&tracker),
                    sink: progress_sink,
                },
            );
        }
        tracing::debug!(task_id = id.0, "task submitted");

        let shared = Arc::clone(&self.shared);
        let loop_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            // One active task per worker slot; the permit is held until the
            // completion message has been sent.
            let _permit = match shared.concurrent_limit.as_ref() {
                Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
                None => None,
            };

            let default_for_panic = default_error.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let handle = ProgressHandle::new(tracker);
                worker::run_work(work, &handle, error_source.as_ref(), &default_error, class)
            })
            .await;

            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    tracing::error!(task_id = id.0, error = %join_error, "work function panicked");
                    Err(Rejection::new(default_for_panic, class))
                }
            };

            let resolve: ResolveFn = Box::new(move || {
                let _ = done_tx.send(outcome.map(transform));
            });
            if loop_tx
                .send(LoopMessage::Complete { id, resolve })
                .is_err()
            {
                // Dropping the resolution thunk drops done_tx, so the future
                // observes LoopClosed instead of hanging.
                tracing::warn!(task_id = id.0, "consumer loop gone; completion undeliverable");
                lock_tasks(&shared).remove(&id);
            }
            // The loop may be idle with nothing else queued; force a
            // scheduling pass so the resolution is processed promptly.
            let _ = loop_tx.send(LoopMessage::Poke);
        });

        Ok(TaskFuture::new(id, done_rx))
    }

    /// Stop accepting new submissions and let running tasks drain
    ///
    /// Running work functions are not interrupted; each still resolves its
    /// future. The consumer loop exits once the last live task completes.
    pub fn shutdown(&self) {
        tracing::info!("dispatcher shutdown requested");
        self.shared.accepting_new.store(false, Ordering::SeqCst);
        let _ = self.loop_tx.send(LoopMessage::Shutdown);
    }

    /// A cloneable handle that forces the consumer loop to run a scheduling pass
    ///
    /// A live `LoopPoke` holds a sender for the loop channel and so keeps the
    /// consumer loop running; drop it once no longer needed.
    pub fn loop_poke(&self) -> LoopPoke {
        LoopPoke {
            tx: self.loop_tx.clone(),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("live_tasks", &lock_tasks(&self.shared).len())
            .field(
                "accepting_new",
                &self.shared.accepting_new.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// "Poke the loop" primitive: enqueues a no-op message purely to force the
/// consumer loop through a scheduling pass
///
/// Created per dispatcher rather than process-wide; clone it anywhere a
/// subsystem needs to nudge an otherwise idle loop.
#[derive(Clone, Debug)]
pub struct LoopPoke {
    tx: UnboundedSender<LoopMessage>,
}

impl LoopPoke {
    /// Wake the consumer loop without delivering any work
    pub fn poke(&self) {
        let _ = self.tx.send(LoopMessage::Poke);
    }
}

/// The single consumer turn loop
///
/// Every progress sink invocation and every future resolution is one discrete
/// turn of this loop; no two of them ever run concurrently.
pub struct ConsumerLoop {
    shared: Arc<Shared>,
    rx: UnboundedReceiver<LoopMessage>,
}

impl ConsumerLoop {
    /// Run the loop until shutdown completes or every sender is gone
    ///
    /// After [`Dispatcher::shutdown`], the loop keeps relaying progress and
    /// completions for in-flight tasks and exits once the task table is empty.
    /// Dropping every [`Dispatcher`] clone (and any [`LoopPoke`]) without
    /// calling shutdown also ends the loop: once the last in-flight task's
    /// tracker and supervisor are gone the channel closes and `run` returns.
    pub async fn run(mut self) {
        tracing::debug!("consumer loop started");
        while let Some(message) = self.rx.recv().await {
            match message {
                LoopMessage::Progress(id) => self.relay_progress(id),
                LoopMessage::Complete { id, resolve } => {
                    self.finish_task(id);
                    resolve();
                    tracing::debug!(task_id = id.0, "task resolved");
                    if self.drained() {
                        break;
                    }
                }
                LoopMessage::Poke => {}
                LoopMessage::Shutdown => {
                    if self.drained() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("consumer loop stopped");
    }

    /// Pull the latest snapshot for `id` and hand it to the task's sink.
    ///
    /// The wake flag is cleared before snapshotting, so a worker mutation
    /// racing with the drain re-arms a fresh notification. The sink runs with
    /// the task table unlocked; sinks may submit new tasks.
    fn relay_progress(&self, id: TaskId) {
        let (snapshot, sink) = {
            let mut tasks = lock_tasks(&self.shared);
            let Some(entry) = tasks.get_mut(&id) else {
                return;
            };
            entry.tracker.take_wake();
            (entry.tracker.snapshot(), entry.sink.take())
        };
        let Some(mut sink) = sink else {
            return;
        };
        sink(snapshot);
        let mut tasks = lock_tasks(&self.shared);
        if let Some(entry) = tasks.get_mut(&id) {
            entry.sink = Some(sink);
        }
    }

    /// Remove the task's entry, flushing any undelivered progress first so the
    /// sink never observes a snapshot after the terminal outcome.
    fn finish_task(&self, id: TaskId) {
        let entry = lock_tasks(&self.shared).remove(&id);
        let Some(mut entry) = entry else {
            return;
        };
        if entry.tracker.take_wake() {
            if let Some(sink) = entry.sink.as_mut() {
                sink(entry.tracker.snapshot());
            }
        }
    }

    /// True once shutdown was requested and no live task remains
    fn drained(&self) -> bool {
        !self.shared.accepting_new.load(Ordering::SeqCst) && lock_tasks(&self.shared).is_empty()
    }
}

impl std::fmt::Debug for ConsumerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerLoop")
            .field("live_tasks", &lock_tasks(&self.shared).len())
            .finish_non_exhaustive()
    }
}
