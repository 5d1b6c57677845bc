//! Workflow execution runtime
//!
//! The coordinator for durable workflow runs: owns the registries, the
//! event store handle, and the notification bus; decides replay vs.
//! execution for each run id and records every lifecycle transition.

use crate::workflow::context::{RunHandle, WorkflowContext};
use crate::workflow::error::{decode_error, encode_error};
use crate::workflow::event::{EventKind, EventLogEntry, WorkflowEvent, WorkflowStatus};
use crate::workflow::invoker::{ActionDispatcher, ActionInvoker};
use crate::workflow::registry::{ActionRegistry, WorkflowRegistry};
use crate::workflow::replay::RunState;
use crate::workflow::store::EventStore;
use crate::workflow::WorkflowError;
use slog::{info, warn, Logger};
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Configuration for a workflow runtime
pub struct RuntimeConfig {
    /// Capacity of the notification broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 1000,
        }
    }
}

/// Runtime for durable workflow execution
///
/// This runtime provides the API for:
/// - Registering action and workflow functions
/// - Running workflows idempotently by run id
/// - Querying run status and results
/// - Subscribing to lifecycle notifications
pub struct WorkflowRuntime {
    store: Arc<dyn EventStore>,
    actions: Arc<RwLock<ActionRegistry>>,
    workflows: Arc<RwLock<WorkflowRegistry>>,
    dispatcher: ActionDispatcher,
    event_tx: broadcast::Sender<WorkflowEvent>,
    logger: Logger,
}

impl WorkflowRuntime {
    /// Create a new workflow runtime over the given store
    pub fn new(store: Arc<dyn EventStore>, logger: Logger) -> Arc<Self> {
        Self::with_config(store, RuntimeConfig::default(), logger)
    }

    /// Create a new workflow runtime with explicit configuration
    pub fn with_config(
        store: Arc<dyn EventStore>,
        config: RuntimeConfig,
        logger: Logger,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let actions = Arc::new(RwLock::new(ActionRegistry::new()));
        let invoker = Arc::new(ActionInvoker::new(actions.clone(), logger.clone()));
        let dispatcher = ActionDispatcher::new(invoker, event_tx.clone(), logger.clone());

        Arc::new(Self {
            store,
            actions,
            workflows: Arc::new(RwLock::new(WorkflowRegistry::new())),
            dispatcher,
            event_tx,
            logger,
        })
    }

    /// Mint a fresh run id
    pub fn new_run_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Register an action function using a closure
    ///
    /// # Returns
    /// * `Ok(())` if registration was successful
    /// * `Err(WorkflowError::AlreadyRegistered)` if the name is taken
    pub fn register_action<I, O, F, Fut>(&self, name: &str, function: F) -> Result<(), WorkflowError>
    where
        I: Send + Sync + for<'de> serde::Deserialize<'de> + 'static,
        O: Send + Sync + serde::Serialize + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    {
        info!(self.logger, "Registering action"; "action" => name);
        self.actions.write().unwrap().register_closure(name, function)
    }

    /// Register a workflow function using a closure
    ///
    /// The closure takes (input, context) and returns a future; every
    /// action or child call it makes through the context is intercepted
    /// and recorded.
    pub fn register_workflow<I, O, F, Fut>(
        &self,
        name: &str,
        function: F,
    ) -> Result<(), WorkflowError>
    where
        I: Send + Sync + for<'de> serde::Deserialize<'de> + 'static,
        O: Send + Sync + serde::Serialize + 'static,
        F: Fn(I, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    {
        info!(self.logger, "Registering workflow"; "workflow" => name);
        self.workflows
            .write()
            .unwrap()
            .register_closure(name, function)
    }

    /// Run a workflow to completion under the given run id
    ///
    /// Re-running a terminal run id returns the recorded result (or
    /// re-raises the recorded failure) without executing anything. A
    /// partial log is resumed: recorded invocations are replayed and only
    /// the remainder executes.
    pub async fn run_workflow<I, O>(
        self: &Arc<Self>,
        run_id: &str,
        workflow: &str,
        input: I,
    ) -> Result<O, WorkflowError>
    where
        I: serde::Serialize,
        O: serde::de::DeserializeOwned,
    {
        let input_bytes = serde_json::to_vec(&input)
            .map_err(|e| WorkflowError::SerializationError(e.to_string()))?;

        let result = self.run_workflow_raw(run_id, workflow, input_bytes).await?;

        serde_json::from_slice(&result)
            .map_err(|e| WorkflowError::DeserializationError(e.to_string()))
    }

    /// Start a workflow run in the background
    ///
    /// Returns a typed handle for waiting on completion. The handle's
    /// subscription is created before the run is spawned, so the terminal
    /// notification cannot be missed.
    pub fn start_workflow<I, O>(
        self: &Arc<Self>,
        run_id: &str,
        workflow: &str,
        input: I,
    ) -> Result<RunHandle<O>, WorkflowError>
    where
        I: serde::Serialize,
        O: serde::de::DeserializeOwned,
    {
        let input_bytes = serde_json::to_vec(&input)
            .map_err(|e| WorkflowError::SerializationError(e.to_string()))?;

        let receiver = self.event_tx.subscribe();
        let runtime = self.clone();
        let run_id_owned = run_id.to_string();
        let workflow_owned = workflow.to_string();
        tokio::spawn(async move {
            let _ = runtime
                .run_workflow_raw(&run_id_owned, &workflow_owned, input_bytes)
                .await;
        });

        Ok(RunHandle::new(run_id.to_string(), receiver))
    }

    /// Drive one run to its terminal state over serialized input
    pub(crate) async fn run_workflow_raw(
        self: &Arc<Self>,
        run_id: &str,
        workflow: &str,
        input: Vec<u8>,
    ) -> Result<Vec<u8>, WorkflowError> {
        let entries = self.store.read_all(run_id)?;

        // A terminal log satisfies the run without invoking anything
        if let Some(outcome) = terminal_outcome(&entries)? {
            info!(self.logger, "Returning recorded outcome"; "run_id" => run_id);
            self.emit_terminal(run_id, &outcome);
            return outcome;
        }

        match recorded_start(&entries) {
            Some((recorded_workflow, recorded_input)) => {
                if recorded_workflow != workflow || recorded_input != &input {
                    return Err(WorkflowError::ReplayDiverged {
                        run_id: run_id.to_string(),
                        detail: format!(
                            "log was recorded for workflow '{}', run requested workflow '{}'",
                            recorded_workflow, workflow
                        ),
                    });
                }
            }
            None => {
                self.store.append(
                    run_id,
                    EventKind::WorkflowStarted {
                        workflow: workflow.to_string(),
                        input: input.clone(),
                    },
                )?;
            }
        }

        let function = {
            let registry = self.workflows.read().unwrap();
            registry.get(workflow)
        }
        .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow.to_string()))?;

        let state = Arc::new(RunState::from_log(run_id, self.store.clone(), &entries)?);
        let context = WorkflowContext::new(run_id.to_string(), state, self.clone());

        info!(self.logger, "Executing workflow"; "run_id" => run_id, "workflow" => workflow);
        let _ = self.event_tx.send(WorkflowEvent::Started {
            run_id: run_id.to_string(),
            workflow: workflow.to_string(),
        });

        let outcome = function.execute(input, context).await;

        match &outcome {
            Ok(result) => {
                self.store.append(
                    run_id,
                    EventKind::WorkflowCompleted {
                        result: result.clone(),
                    },
                )?;
                info!(self.logger, "Workflow completed"; "run_id" => run_id);
            }
            Err(error) => {
                self.store.append(
                    run_id,
                    EventKind::WorkflowFailed {
                        error: encode_error(error)?,
                    },
                )?;
                warn!(self.logger, "Workflow failed";
                    "run_id" => run_id,
                    "error" => format!("{}", error)
                );
            }
        }
        self.emit_terminal(run_id, &outcome);

        outcome
    }

    /// Get a run's status, derived from its log
    pub fn get_run_status(&self, run_id: &str) -> Result<Option<WorkflowStatus>, WorkflowError> {
        let entries = self.store.read_all(run_id)?;
        if entries.is_empty() {
            return Ok(None);
        }
        let status = entries
            .iter()
            .find_map(|entry| match &entry.event {
                EventKind::WorkflowCompleted { .. } => Some(WorkflowStatus::Completed),
                EventKind::WorkflowFailed { .. } => Some(WorkflowStatus::Failed),
                _ => None,
            })
            .unwrap_or(WorkflowStatus::Running);
        Ok(Some(status))
    }

    /// Check whether a run has reached its terminal state
    pub fn is_run_terminal(&self, run_id: &str) -> Result<bool, WorkflowError> {
        Ok(self.store.is_terminal(run_id)?)
    }

    /// Get a completed run's serialized result
    pub fn get_result(&self, run_id: &str) -> Result<Option<Vec<u8>>, WorkflowError> {
        let entries = self.store.read_all(run_id)?;
        Ok(entries.iter().find_map(|entry| match &entry.event {
            EventKind::WorkflowCompleted { result } => Some(result.clone()),
            _ => None,
        }))
    }

    /// Subscribe to lifecycle notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    fn emit_terminal(&self, run_id: &str, outcome: &Result<Vec<u8>, WorkflowError>) {
        let event = match outcome {
            Ok(result) => WorkflowEvent::Completed {
                run_id: run_id.to_string(),
                result: result.clone(),
            },
            Err(error) => WorkflowEvent::Failed {
                run_id: run_id.to_string(),
                error: error.clone(),
            },
        };
        let _ = self.event_tx.send(event);
    }
}

/// Decode the run's recorded terminal outcome, if any
fn terminal_outcome(
    entries: &[EventLogEntry],
) -> Result<Option<Result<Vec<u8>, WorkflowError>>, WorkflowError> {
    for entry in entries {
        match &entry.event {
            EventKind::WorkflowCompleted { result } => return Ok(Some(Ok(result.clone()))),
            EventKind::WorkflowFailed { error } => {
                return Ok(Some(Err(decode_error(error)?)));
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Find the recorded `WorkflowStarted` entry, if any
fn recorded_start(entries: &[EventLogEntry]) -> Option<(&str, &Vec<u8>)> {
    entries.iter().find_map(|entry| match &entry.event {
        EventKind::WorkflowStarted { workflow, input } => Some((workflow.as_str(), input)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::store::InMemoryEventStore;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn create_test_logger() -> Logger {
        use slog::Drain;
        let decorator = slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Logger::root(drain, slog::o!())
    }

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct AddInput {
        a: u64,
        b: u64,
    }

    #[tokio::test]
    async fn test_workflow_execution_end_to_end() {
        let store = Arc::new(InMemoryEventStore::new());
        let runtime = WorkflowRuntime::new(store, create_test_logger());

        runtime
            .register_action("add", |input: AddInput| async move {
                Ok::<u64, WorkflowError>(input.a + input.b)
            })
            .expect("Action registration should succeed");

        runtime
            .register_workflow("sum_to", |n: u64, ctx: WorkflowContext| async move {
                let mut total = 0u64;
                for i in 1..=n {
                    total = ctx.call("add", AddInput { a: total, b: i }).await?;
                }
                Ok::<u64, WorkflowError>(total)
            })
            .expect("Workflow registration should succeed");

        let result: u64 = runtime
            .run_workflow("sum-test-1", "sum_to", 10u64)
            .await
            .expect("Workflow should complete successfully");

        assert_eq!(result, 55);
        assert_eq!(
            runtime.get_run_status("sum-test-1").unwrap(),
            Some(WorkflowStatus::Completed)
        );
        assert!(runtime.get_result("sum-test-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_workflow_not_found() {
        let store = Arc::new(InMemoryEventStore::new());
        let runtime = WorkflowRuntime::new(store, create_test_logger());

        let result: Result<u64, _> = runtime
            .run_workflow("missing-wf-1", "nonexistent", 5u64)
            .await;

        assert!(matches!(result, Err(WorkflowError::WorkflowNotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let store = Arc::new(InMemoryEventStore::new());
        let runtime = WorkflowRuntime::new(store, create_test_logger());

        runtime
            .register_action("noop", |_: u64| async move { Ok::<u64, WorkflowError>(0) })
            .unwrap();
        let duplicate =
            runtime.register_action("noop", |_: u64| async move { Ok::<u64, WorkflowError>(0) });

        assert!(matches!(
            duplicate,
            Err(WorkflowError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_status_of_unknown_run_is_none() {
        let store = Arc::new(InMemoryEventStore::new());
        let runtime = WorkflowRuntime::new(store, create_test_logger());

        assert_eq!(runtime.get_run_status("unknown").unwrap(), None);
        assert_eq!(runtime.get_result("unknown").unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_workflow_resolves_through_handle() {
        let store = Arc::new(InMemoryEventStore::new());
        let runtime = WorkflowRuntime::new(store, create_test_logger());

        let calls = Arc::new(AtomicU64::new(0));
        let calls_action = calls.clone();
        runtime
            .register_action("tick", move |_: u64| {
                let calls = calls_action.clone();
                async move { Ok::<u64, WorkflowError>(calls.fetch_add(1, Ordering::SeqCst) + 1) }
            })
            .unwrap();

        runtime
            .register_workflow("tick_once", |_: u64, ctx: WorkflowContext| async move {
                ctx.call::<u64, u64>("tick", 0).await
            })
            .unwrap();

        let handle = runtime
            .start_workflow::<u64, u64>("handle-test-1", "tick_once", 0)
            .expect("Workflow start should succeed");

        let result = handle
            .wait_for_completion()
            .await
            .expect("Workflow should complete successfully");

        assert_eq!(result, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
