//! # task-bridge
//!
//! Background task execution and progress-streaming bridge for the
//! single-threaded side of a host runtime.
//!
//! ## Design Philosophy
//!
//! task-bridge is designed to be:
//! - **Blocking-friendly** - Work functions may block on file or network I/O;
//!   they run on a background worker pool, never on the consumer loop
//! - **Single-consumer** - Progress sinks and result transformers always
//!   execute on the consumer loop, one turn at a time, never concurrently
//! - **Exactly-once** - Every submitted task resolves its future exactly once,
//!   as either a fulfilled value or a rejection
//! - **Library-first** - No CLI or transport, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use task_bridge::{Dispatcher, DispatcherConfig, ErrorClass, TaskOptions, WorkOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (dispatcher, consumer) = Dispatcher::new(DispatcherConfig::default());
//!
//!     // Drive the consumer loop; all sinks and transformers run here.
//!     tokio::spawn(consumer.run());
//!
//!     let options = TaskOptions::new("could not scan repository", ErrorClass::new(7))
//!         .with_progress_sink(|snapshot| {
//!             for line in &snapshot.new_messages {
//!                 println!("[{}] {}", snapshot.step_name, line);
//!             }
//!         });
//!
//!     let pending = dispatcher.submit(
//!         |progress| {
//!             progress.step("scanning", 1);
//!             progress.message("walking the tree");
//!             WorkOutcome::Success(21_u64)
//!         },
//!         |raw| raw * 2,
//!         options,
//!     )?;
//!
//!     let value = pending.await?;
//!     assert_eq!(value, 42);
//!
//!     dispatcher.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Dispatcher configuration types
pub mod config;
/// Task submission, progress relay, and the consumer loop
pub mod dispatcher;
/// Error types
pub mod error;
/// The consumer-visible pending/fulfilled/rejected task handle
pub mod future;
/// Per-task progress tracking and snapshots
pub mod progress;
/// Core types and functional contracts
pub mod types;

pub(crate) mod worker;

pub use config::{DispatcherConfig, OverflowPolicy};
pub use dispatcher::{ConsumerLoop, Dispatcher, LoopPoke};
pub use error::{Error, Rejection, Result};
pub use future::TaskFuture;
pub use progress::{ProgressHandle, ProgressSnapshot};
pub use types::{ErrorClass, ErrorSource, NoLastError, TaskId, TaskOptions, WorkOutcome};
