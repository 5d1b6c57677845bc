//! Action execution
//!
//! `ActionInvoker` runs one registered action; `ActionDispatcher` spawns
//! invocations as independent tasks so scheduled actions from the same run
//! can execute concurrently. A task records its terminal event before
//! resolving the handle, so a resolved `wait()` implies the outcome is in
//! the log.

use crate::workflow::event::WorkflowEvent;
use crate::workflow::registry::ActionRegistry;
use crate::workflow::replay::RunState;
use crate::workflow::WorkflowError;
use slog::{debug, warn, Logger};
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, oneshot};

/// Executes a single registered action with serialized arguments
pub(crate) struct ActionInvoker {
    registry: Arc<RwLock<ActionRegistry>>,
    logger: Logger,
}

impl ActionInvoker {
    pub fn new(registry: Arc<RwLock<ActionRegistry>>, logger: Logger) -> Self {
        Self { registry, logger }
    }

    /// Look up the action and execute it
    ///
    /// A failure returned by the action does not escape as a crash; it is
    /// the invocation's outcome, handed back as data.
    pub async fn invoke(&self, action: &str, input: Vec<u8>) -> Result<Vec<u8>, WorkflowError> {
        let function = {
            let registry = self.registry.read().unwrap();
            registry.get(action)
        }
        .ok_or_else(|| WorkflowError::ActionNotFound(action.to_string()))?;

        debug!(self.logger, "Invoking action"; "action" => action);
        function.execute(input).await
    }
}

/// Dispatches action invocations as concurrent tasks
pub(crate) struct ActionDispatcher {
    invoker: Arc<ActionInvoker>,
    event_tx: broadcast::Sender<WorkflowEvent>,
    logger: Logger,
}

impl ActionDispatcher {
    pub fn new(
        invoker: Arc<ActionInvoker>,
        event_tx: broadcast::Sender<WorkflowEvent>,
        logger: Logger,
    ) -> Self {
        Self {
            invoker,
            event_tx,
            logger,
        }
    }

    /// Spawn one task for the invocation and return the receiver its
    /// outcome will arrive on
    pub fn dispatch(
        &self,
        state: Arc<RunState>,
        invocation_id: u64,
        action: String,
        input: Vec<u8>,
    ) -> oneshot::Receiver<Result<Vec<u8>, WorkflowError>> {
        let (tx, rx) = oneshot::channel();
        let invoker = self.invoker.clone();
        let event_tx = self.event_tx.clone();
        let logger = self.logger.clone();

        tokio::spawn(async move {
            let run_id = state.run_id().to_string();

            if let Err(e) = state.append_started(invocation_id) {
                let _ = tx.send(Err(e));
                return;
            }

            let outcome = invoker.invoke(&action, input).await;

            // Terminal event goes to the log before the waiter is released
            let outcome = match state.record_action_result(invocation_id, &outcome) {
                Ok(()) => outcome,
                Err(store_error) => Err(store_error),
            };

            match &outcome {
                Ok(_) => {
                    debug!(logger, "Action completed";
                        "run_id" => &run_id,
                        "action" => &action,
                        "invocation_id" => invocation_id
                    );
                    let _ = event_tx.send(WorkflowEvent::ActionCompleted {
                        run_id,
                        invocation_id,
                        action,
                    });
                }
                Err(error) => {
                    warn!(logger, "Action failed";
                        "run_id" => &run_id,
                        "action" => &action,
                        "invocation_id" => invocation_id,
                        "error" => format!("{}", error)
                    );
                    let _ = event_tx.send(WorkflowEvent::ActionFailed {
                        run_id,
                        invocation_id,
                        action,
                        error: error.clone(),
                    });
                }
            }

            let _ = tx.send(outcome);
        });

        rx
    }
}

enum Resolution {
    /// Satisfied from the log; no task was spawned
    Ready(Result<Vec<u8>, WorkflowError>),
    Pending(oneshot::Receiver<Result<Vec<u8>, WorkflowError>>),
}

/// Handle to a scheduled action invocation
///
/// Returned by `WorkflowContext::schedule`; `wait()` suspends the calling
/// workflow until the invocation reaches its terminal state and yields the
/// typed result, or re-raises the invocation's stored error.
pub struct ActionHandle<O> {
    action: String,
    invocation_id: u64,
    resolution: Resolution,
    _phantom: PhantomData<fn() -> O>,
}

impl<O> ActionHandle<O>
where
    O: serde::de::DeserializeOwned,
{
    pub(crate) fn ready(
        action: &str,
        invocation_id: u64,
        outcome: Result<Vec<u8>, WorkflowError>,
    ) -> Self {
        Self {
            action: action.to_string(),
            invocation_id,
            resolution: Resolution::Ready(outcome),
            _phantom: PhantomData,
        }
    }

    pub(crate) fn pending(
        action: &str,
        invocation_id: u64,
        receiver: oneshot::Receiver<Result<Vec<u8>, WorkflowError>>,
    ) -> Self {
        Self {
            action: action.to_string(),
            invocation_id,
            resolution: Resolution::Pending(receiver),
            _phantom: PhantomData,
        }
    }

    /// Get the action name this handle refers to
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Get the invocation id assigned to this call
    pub fn invocation_id(&self) -> u64 {
        self.invocation_id
    }

    /// Suspend until the invocation resolves and decode its result
    pub async fn wait(self) -> Result<O, WorkflowError> {
        let outcome = match self.resolution {
            Resolution::Ready(outcome) => outcome,
            Resolution::Pending(receiver) => match receiver.await {
                Ok(outcome) => outcome,
                Err(_) => Err(WorkflowError::ExecutionError(format!(
                    "action '{}' task dropped before completion",
                    self.action
                ))),
            },
        };

        let bytes = outcome?;
        serde_json::from_slice(&bytes)
            .map_err(|e| WorkflowError::DeserializationError(e.to_string()))
    }
}
