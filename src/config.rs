//! Configuration types for task-bridge

use serde::{Deserialize, Serialize};

/// Dispatcher configuration
///
/// Controls the worker pool gate and the per-task progress message queue.
/// The defaults reproduce the unbounded behavior of classic async-worker
/// bridges: no concurrency cap and no message-queue cap.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Maximum number of tasks running on worker threads at once
    /// (default: None = unbounded)
    ///
    /// Each running task occupies exactly one worker slot for its whole
    /// lifetime; further tasks wait until a slot frees up.
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,

    /// Maximum queued progress messages per task (default: None = unbounded)
    ///
    /// When a consumer stalls, an unbounded queue grows without limit. Setting
    /// a cap bounds memory at the cost of losing messages according to
    /// [`overflow_policy`](Self::overflow_policy).
    #[serde(default)]
    pub max_pending_messages: Option<usize>,

    /// What to do with a new message when the queue is at capacity
    /// (default: drop the oldest queued message)
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: None,
            max_pending_messages: None,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Overflow behavior for a bounded progress message queue
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the oldest queued message to make room
    #[default]
    DropOldest,
    /// Drop the incoming message, keeping what is already queued
    DropNewest,
    /// Drop the oldest queued message and prepend a truncation marker
    /// (`[N earlier message(s) dropped]`) to the next drained snapshot
    Coalesce,
}
