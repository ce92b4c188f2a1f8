//! End-to-end tests: submit real (blocking) work functions through the
//! dispatcher and assert on what the consumer loop observes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task_bridge::{
    Dispatcher, DispatcherConfig, ErrorClass, ErrorSource, ProgressSnapshot, TaskOptions,
    WorkOutcome,
};

fn collecting_sink() -> (
    Arc<Mutex<Vec<ProgressSnapshot>>>,
    impl FnMut(ProgressSnapshot) + Send + 'static,
) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink_copy = Arc::clone(&collected);
    let sink = move |snapshot: ProgressSnapshot| {
        sink_copy.lock().unwrap().push(snapshot);
    };
    (collected, sink)
}

/// The full clone-shaped scenario: two phases, a log line, numeric
/// sub-progress reaching (10, 10) before the final phase clears it, and a
/// transformed success value.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clone_shaped_task_streams_progress_and_fulfills() {
    let (dispatcher, consumer) = Dispatcher::new(DispatcherConfig::default());
    let loop_handle = tokio::spawn(consumer.run());

    let snapshots = Arc::new(Mutex::new(Vec::new()));
    let snapshots_for_sink = Arc::clone(&snapshots);

    // The sink tells the worker once it has seen the finished numeric state,
    // so the step-2 transition (which clears it) is guaranteed to come after.
    let (seen_full_tx, seen_full_rx) = std::sync::mpsc::channel();
    let sink = move |snapshot: ProgressSnapshot| {
        if snapshot.done == Some(10) && snapshot.total == Some(10) {
            seen_full_tx.send(()).ok();
        }
        snapshots_for_sink.lock().unwrap().push(snapshot);
    };

    let future = dispatcher
        .submit(
            move |progress| {
                progress.step("fetching", 1);
                progress.message("connecting");
                progress.progress_change(0, 10);
                progress.progress_change(10, 10);
                seen_full_rx
                    .recv_timeout(Duration::from_secs(5))
                    .expect("consumer never observed the full numeric state");
                progress.step("done", 2);
                WorkOutcome::Success(42_u64)
            },
            |raw| raw * 2,
            TaskOptions::new("could not clone repository", ErrorClass::new(6))
                .with_progress_sink(sink),
        )
        .expect("dispatcher should accept the task");

    assert_eq!(future.await.unwrap(), 84);

    {
        let snapshots = snapshots.lock().unwrap();
        let connecting_count = snapshots
            .iter()
            .flat_map(|s| s.new_messages.iter())
            .filter(|m| m.as_str() == "connecting")
            .count();
        assert_eq!(connecting_count, 1, "the log line must arrive exactly once");

        let full_at = snapshots
            .iter()
            .position(|s| s.done == Some(10) && s.total == Some(10))
            .expect("the finished numeric state must be observed");
        assert_eq!(snapshots[full_at].step_name, "fetching");

        let step_two_at = snapshots
            .iter()
            .position(|s| s.step_name == "done")
            .expect("the final phase must be observed");
        assert!(
            full_at < step_two_at,
            "numeric (10, 10) must be seen before the transition that clears it"
        );
        assert_eq!(snapshots[step_two_at].step, 2);
        assert_eq!(snapshots[step_two_at].done, None);
        assert_eq!(snapshots[step_two_at].total, None);
    }

    dispatcher.shutdown();
    loop_handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_keep_their_progress_streams_apart() {
    let (dispatcher, consumer) = Dispatcher::new(DispatcherConfig::default());
    let loop_handle = tokio::spawn(consumer.run());

    let mut futures = Vec::new();
    let mut collectors = Vec::new();
    for task in 0..4_u32 {
        let (collected, sink) = collecting_sink();
        collectors.push(collected);
        let future = dispatcher
            .submit(
                move |progress| {
                    progress.step("working", 1);
                    for i in 0..8 {
                        progress.message(format!("task {task} line {i}"));
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    WorkOutcome::Success(task)
                },
                |raw| raw,
                TaskOptions::new("failed", ErrorClass::default()).with_progress_sink(sink),
            )
            .unwrap();
        futures.push(future);
    }

    let values: Vec<u32> = futures::future::join_all(futures)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(values, vec![0, 1, 2, 3]);

    for (task, collected) in collectors.iter().enumerate() {
        let snapshots = collected.lock().unwrap();
        let messages: Vec<String> = snapshots
            .iter()
            .flat_map(|s| s.new_messages.iter().cloned())
            .collect();
        let expected: Vec<String> = (0..8).map(|i| format!("task {task} line {i}")).collect();
        assert_eq!(
            messages, expected,
            "task {task} must only see its own messages, in order"
        );
    }

    dispatcher.shutdown();
    loop_handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_clone_rejects_with_collaborator_error() {
    struct GitLikeErrorState(Mutex<Option<String>>);
    impl ErrorSource for GitLikeErrorState {
        fn last_error(&self) -> Option<String> {
            self.0.lock().unwrap().clone()
        }
    }

    let (dispatcher, consumer) = Dispatcher::new(DispatcherConfig::default());
    let loop_handle = tokio::spawn(consumer.run());

    let error_state = GitLikeErrorState(Mutex::new(Some(
        "failed to resolve address for origin".to_string(),
    )));

    let future = dispatcher
        .submit(
            |progress| -> WorkOutcome<u32> {
                progress.step("fetching", 1);
                progress.message("connecting");
                WorkOutcome::Failure
            },
            |raw| raw,
            TaskOptions::new("could not clone repository", ErrorClass::new(6))
                .with_error_source(error_state),
        )
        .unwrap();

    let err = future.await.unwrap_err();
    let rejection = err.rejection().expect("failure must reject the future");
    assert_eq!(rejection.message, "failed to resolve address for origin");
    assert_eq!(rejection.class, ErrorClass::new(6));

    dispatcher.shutdown();
    loop_handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_sink_still_resolves_and_discards_progress() {
    let (dispatcher, consumer) = Dispatcher::new(DispatcherConfig::default());
    let loop_handle = tokio::spawn(consumer.run());

    let future = dispatcher
        .submit(
            |progress| {
                for i in 0..32 {
                    progress.message(format!("unheard {i}"));
                }
                WorkOutcome::Success("done")
            },
            |raw| raw,
            TaskOptions::new("failed", ErrorClass::default()),
        )
        .unwrap();

    assert_eq!(future.await.unwrap(), "done");

    dispatcher.shutdown();
    loop_handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_slots_serialize_execution_but_not_submission() {
    let config = DispatcherConfig {
        max_concurrent_tasks: Some(2),
        ..DispatcherConfig::default()
    };
    let (dispatcher, consumer) = Dispatcher::new(config);
    let loop_handle = tokio::spawn(consumer.run());

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    // Submission never blocks: all six futures come back before any finishes.
    let mut futures = Vec::new();
    for i in 0..6_u64 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let future = dispatcher
            .submit(
                move |_| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                    WorkOutcome::Success(i)
                },
                |raw| raw,
                TaskOptions::new("failed", ErrorClass::default()),
            )
            .unwrap();
        futures.push(future);
    }
    assert_eq!(futures.len(), 6);

    let mut values: Vec<u64> = futures::future::join_all(futures)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    values.sort_unstable();
    assert_eq!(values, (0..6).collect::<Vec<u64>>());
    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "no more than two tasks may hold worker slots at once"
    );

    dispatcher.shutdown();
    loop_handle.await.unwrap();
}
