//! Per-task progress tracking: the thread-safe tracker a work function
//! mutates, and the immutable snapshots the consumer loop drains from it.
//!
//! One tracker exists per task. The worker thread mutates it through a
//! [`ProgressHandle`]; the consumer loop drains it with `snapshot()`. A single
//! short-held mutex guards the step, numeric, and message state jointly so a
//! snapshot is atomic across all three. Wakes are edge-triggered: a mutation
//! notifies the consumer loop only when no notification is already pending,
//! so rapid updates coalesce into one snapshot.

use crate::config::OverflowPolicy;
use crate::dispatcher::LoopMessage;
use crate::types::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

/// Bounded-queue settings for a tracker's message queue
#[derive(Clone, Copy, Debug)]
pub(crate) struct MessageLimit {
    pub(crate) capacity: Option<usize>,
    pub(crate) policy: OverflowPolicy,
}

impl MessageLimit {
    /// No capacity limit; messages queue until drained
    pub(crate) fn unbounded() -> Self {
        Self {
            capacity: None,
            policy: OverflowPolicy::DropOldest,
        }
    }

    pub(crate) fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            policy,
        }
    }
}

/// Mutable progress state, guarded by the tracker's mutex
#[derive(Debug)]
struct ProgressState {
    /// Highest step index accepted so far (0 = no step yet)
    last_step_index: u32,
    /// Ordinal of the current phase: number of accepted transitions
    step: u32,
    /// Name of the current phase
    step_name: String,
    /// Total declared phases
    step_count: u32,
    /// Numeric sub-progress within the current step; stored as a pair so
    /// done/total can never disagree
    numeric: Option<(u64, u64)>,
    /// Messages appended by the worker, not yet drained by the consumer
    messages: VecDeque<String>,
    /// Messages lost to the overflow policy since the last drain
    dropped: u64,
}

/// Thread-safe aggregator of one task's in-flight progress
///
/// Mutators run on the worker thread while `snapshot()` runs on the consumer
/// loop; every critical section is O(1) amortized so the worker never stalls
/// behind a drain.
pub(crate) struct ProgressTracker {
    id: TaskId,
    state: Mutex<ProgressState>,
    wake_pending: AtomicBool,
    loop_tx: UnboundedSender<LoopMessage>,
    limit: MessageLimit,
}

impl ProgressTracker {
    pub(crate) fn new(id: TaskId, loop_tx: UnboundedSender<LoopMessage>, limit: MessageLimit) -> Self {
        Self {
            id,
            state: Mutex::new(ProgressState {
                last_step_index: 0,
                step: 0,
                step_name: String::new(),
                step_count: 1,
                numeric: None,
                messages: VecDeque::new(),
                dropped: 0,
            }),
            wake_pending: AtomicBool::new(false),
            loop_tx,
            limit,
        }
    }

    /// Record a phase transition.
    ///
    /// Acceptance policy: `index` must be greater than the last accepted index.
    /// A repeated equal index is an idempotent no-op (domain callbacks often
    /// re-announce the current phase on every event); a lower index is stale
    /// and ignored. On acceptance the ordinal bumps, the name is replaced, and
    /// the numeric pair is cleared.
    pub(crate) fn step(&self, name: &str, index: u32) {
        {
            let mut state = self.lock_state();
            if index <= state.last_step_index {
                tracing::trace!(task_id = self.id.0, index, "step update ignored");
                return;
            }
            state.last_step_index = index;
            state.step += 1;
            state.step_name.clear();
            state.step_name.push_str(name);
            state.numeric = None;
        }
        self.notify();
    }

    /// Append a free-text message; never blocks on I/O
    pub(crate) fn message(&self, text: impl Into<String>) {
        {
            let mut state = self.lock_state();
            if let Some(capacity) = self.limit.capacity {
                if state.messages.len() >= capacity {
                    match self.limit.policy {
                        OverflowPolicy::DropOldest => {
                            state.messages.pop_front();
                        }
                        OverflowPolicy::DropNewest => return,
                        OverflowPolicy::Coalesce => {
                            state.messages.pop_front();
                            state.dropped += 1;
                        }
                    }
                }
            }
            state.messages.push_back(text.into());
        }
        self.notify();
    }

    /// Set numeric sub-progress without touching step identity
    pub(crate) fn progress_change(&self, done: u64, total: u64) {
        {
            let mut state = self.lock_state();
            state.numeric = Some((done, total));
        }
        self.notify();
    }

    /// Declare the total number of phases
    pub(crate) fn set_step_count(&self, count: u32) {
        {
            let mut state = self.lock_state();
            state.step_count = count;
        }
        self.notify();
    }

    /// Atomically drain queued messages and copy the remaining fields.
    ///
    /// Called only from the consumer loop. The message queue is logically
    /// empty the moment this returns; numeric and step fields are
    /// last-write-wins at drain time.
    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        let mut state = self.lock_state();
        let mut new_messages: Vec<String> = state.messages.drain(..).collect();
        if state.dropped > 0 {
            new_messages.insert(
                0,
                format!("[{} earlier message(s) dropped]", state.dropped),
            );
            state.dropped = 0;
        }
        ProgressSnapshot {
            step: state.step,
            step_name: state.step_name.clone(),
            step_count: state.step_count,
            new_messages,
            done: state.numeric.map(|(done, _)| done),
            total: state.numeric.map(|(_, total)| total),
        }
    }

    /// Clear the pending-wake flag, returning whether a wake was pending
    ///
    /// The consumer loop clears the flag *before* snapshotting so a mutation
    /// racing with the drain re-arms a fresh wake rather than getting lost.
    pub(crate) fn take_wake(&self) -> bool {
        self.wake_pending.swap(false, Ordering::AcqRel)
    }

    /// Wake the consumer loop unless a wake is already pending
    fn notify(&self) {
        if !self.wake_pending.swap(true, Ordering::AcqRel) {
            let _ = self.loop_tx.send(LoopMessage::Progress(self.id));
        }
    }

    /// A panicking work function poisons the mutex; the relay must still be
    /// able to drain whatever state was written before the panic.
    fn lock_state(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("id", &self.id)
            .field("wake_pending", &self.wake_pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// The progress handle a work function receives
///
/// All methods are safe to call from the worker thread at any point during
/// execution; updates are streamed to the task's progress sink on the
/// consumer loop.
#[derive(Clone, Debug)]
pub struct ProgressHandle {
    tracker: Arc<ProgressTracker>,
}

impl ProgressHandle {
    pub(crate) fn new(tracker: Arc<ProgressTracker>) -> Self {
        Self { tracker }
    }

    /// Record a phase transition to `name` at 1-based `index`
    ///
    /// Only forward transitions are accepted: an index at or below the last
    /// accepted one is ignored, so per-event re-announcements of the current
    /// phase stay cheap. Note that this applies even when the repeated index
    /// carries a different `name`; renaming a phase requires a higher index.
    /// Accepting a transition clears numeric sub-progress.
    pub fn step(&self, name: &str, index: u32) {
        self.tracker.step(name, index);
    }

    /// Queue a free-text log line for the progress sink
    pub fn message(&self, text: impl Into<String>) {
        self.tracker.message(text);
    }

    /// Report numeric sub-progress (`done` of `total`) within the current step
    pub fn progress_change(&self, done: u64, total: u64) {
        self.tracker.progress_change(done, total);
    }

    /// Declare the total number of phases (defaults to 1)
    pub fn set_step_count(&self, count: u32) {
        self.tracker.set_step_count(count);
    }
}

/// Immutable point-in-time copy of a task's progress
///
/// Handed to the progress sink on the consumer loop. Messages appear exactly
/// once across all snapshots of a task, in append order; `done` and `total`
/// are always both present or both absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Ordinal of the current phase (number of accepted transitions)
    pub step: u32,
    /// Name of the current phase (empty before the first transition)
    pub step_name: String,
    /// Total declared phases
    pub step_count: u32,
    /// Messages queued since the previous snapshot, oldest first
    pub new_messages: Vec<String>,
    /// Completed units within the current step, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<u64>,
    /// Total units within the current step, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}
