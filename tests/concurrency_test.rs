//! Integration tests for concurrent action scheduling
//!
//! Scheduled actions from one run execute as independent tasks; a handle's
//! `wait()` resolves only after the invocation's terminal event is in the
//! log, so gather-style fan-out observes every effect recorded.

use durflow::{
    EventKind, EventStore, InMemoryEventStore, WorkflowContext, WorkflowError, WorkflowRuntime,
};
use slog::Drain;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn create_test_logger() -> slog::Logger {
    let decorator = slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

#[tokio::test]
async fn test_schedule_then_wait_matches_direct_call() {
    let store = Arc::new(InMemoryEventStore::new());
    let runtime = WorkflowRuntime::new(store, create_test_logger());

    runtime
        .register_action("answer_plus", |to_add: u64| async move {
            Ok::<u64, WorkflowError>(42 + to_add)
        })
        .unwrap();

    runtime
        .register_workflow("direct", |_: (), ctx: WorkflowContext| async move {
            ctx.call::<u64, u64>("answer_plus", 0).await
        })
        .unwrap();

    runtime
        .register_workflow("deferred", |_: (), ctx: WorkflowContext| async move {
            let handle = ctx.schedule::<u64, u64>("answer_plus", 2)?;
            handle.wait().await
        })
        .unwrap();

    let direct: u64 = runtime
        .run_workflow(&Uuid::new_v4().to_string(), "direct", ())
        .await
        .expect("Direct call should complete");
    let deferred: u64 = runtime
        .run_workflow(&Uuid::new_v4().to_string(), "deferred", ())
        .await
        .expect("Scheduled call should complete");

    assert_eq!(direct, 42);
    assert_eq!(deferred, 44);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fan_out_applies_every_effect() {
    let store = Arc::new(InMemoryEventStore::new());
    let runtime = WorkflowRuntime::new(store.clone(), create_test_logger());

    let counter = Arc::new(Mutex::new(0u64));
    let counter_action = counter.clone();
    runtime
        .register_action("incr_by", move |n: u64| {
            let counter = counter_action.clone();
            async move {
                let mut value = counter.lock().unwrap();
                *value += n;
                Ok::<u64, WorkflowError>(n)
            }
        })
        .unwrap();

    runtime
        .register_workflow("fan_out", |_: (), ctx: WorkflowContext| async move {
            let handles = vec![
                ctx.schedule::<u64, u64>("incr_by", 1)?,
                ctx.schedule::<u64, u64>("incr_by", 2)?,
                ctx.schedule::<u64, u64>("incr_by", 3)?,
            ];

            let results = futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;

            let mut sum = 0u64;
            for result in results {
                sum += result?;
            }
            Ok::<u64, WorkflowError>(sum)
        })
        .unwrap();

    let run_id = Uuid::new_v4().to_string();

    let sum: u64 = runtime
        .run_workflow(&run_id, "fan_out", ())
        .await
        .expect("Fan-out should complete");

    // No lost updates
    assert_eq!(sum, 6);
    assert_eq!(*counter.lock().unwrap(), 6);

    // All three invocations reached the log, and their terminal events
    // precede the workflow's own completion
    let entries = store.read_all(&run_id).unwrap();
    let completion_seq = entries
        .iter()
        .find_map(|e| match e.event {
            EventKind::WorkflowCompleted { .. } => Some(e.sequence),
            _ => None,
        })
        .expect("Run should have completed");
    let action_terminal_seqs: Vec<u64> = entries
        .iter()
        .filter_map(|e| match e.event {
            EventKind::ActionCompleted { .. } => Some(e.sequence),
            _ => None,
        })
        .collect();
    assert_eq!(action_terminal_seqs.len(), 3);
    assert!(action_terminal_seqs.iter().all(|seq| *seq < completion_seq));

    // Re-running the fan-out replays all three results
    let replayed: u64 = runtime
        .run_workflow(&run_id, "fan_out", ())
        .await
        .expect("Replay should complete");
    assert_eq!(replayed, 6);
    assert_eq!(*counter.lock().unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_handles_resolve_out_of_dispatch_order() {
    let store = Arc::new(InMemoryEventStore::new());
    let runtime = WorkflowRuntime::new(store, create_test_logger());

    runtime
        .register_action("slow_echo", |n: u64| async move {
            // The larger input finishes later
            tokio::time::sleep(tokio::time::Duration::from_millis(n * 10)).await;
            Ok::<u64, WorkflowError>(n)
        })
        .unwrap();

    runtime
        .register_workflow("reversed_waits", |_: (), ctx: WorkflowContext| async move {
            let slow = ctx.schedule::<u64, u64>("slow_echo", 5)?;
            let fast = ctx.schedule::<u64, u64>("slow_echo", 1)?;

            // Wait in the opposite order of dispatch
            let fast_result = fast.wait().await?;
            let slow_result = slow.wait().await?;
            Ok::<(u64, u64), WorkflowError>((fast_result, slow_result))
        })
        .unwrap();

    let (fast, slow): (u64, u64) = runtime
        .run_workflow(&Uuid::new_v4().to_string(), "reversed_waits", ())
        .await
        .expect("Workflow should complete");

    assert_eq!(fast, 1);
    assert_eq!(slow, 5);
}
