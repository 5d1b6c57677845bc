//! Workflow execution context
//!
//! Provides the context for workflow execution: the run id, plus the
//! intercepted entry points for calling actions, scheduling them
//! concurrently, and running child workflows.

use crate::workflow::event::WorkflowEvent;
use crate::workflow::invoker::ActionHandle;
use crate::workflow::replay::{ActionDisposition, ChildDisposition, RunState};
use crate::workflow::runtime::WorkflowRuntime;
use crate::workflow::WorkflowError;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Context provided to workflow functions during execution
///
/// Every action or child workflow call made through the context consults
/// the run's event log first: a recorded outcome is replayed instead of
/// re-executing the side effect.
#[derive(Clone)]
pub struct WorkflowContext {
    run_id: String,
    state: Arc<RunState>,
    runtime: Arc<WorkflowRuntime>,
}

impl WorkflowContext {
    pub(crate) fn new(run_id: String, state: Arc<RunState>, runtime: Arc<WorkflowRuntime>) -> Self {
        Self {
            run_id,
            state,
            runtime,
        }
    }

    /// Get the run id
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Schedule an action without blocking
    ///
    /// Assigns the call's invocation id, records it, and dispatches the
    /// action as an independent task. The returned handle resolves via
    /// `wait()`. On the replay path the handle is already resolved and no
    /// side effect runs.
    pub fn schedule<I, O>(&self, action: &str, input: I) -> Result<ActionHandle<O>, WorkflowError>
    where
        I: serde::Serialize,
        O: serde::de::DeserializeOwned,
    {
        let input_bytes = serde_json::to_vec(&input)
            .map_err(|e| WorkflowError::SerializationError(e.to_string()))?;

        match self.state.begin_action(action, &input_bytes)? {
            ActionDisposition::Replayed {
                invocation_id,
                outcome,
            } => Ok(ActionHandle::ready(action, invocation_id, outcome)),
            ActionDisposition::Execute { invocation_id } => {
                let receiver = self.runtime.dispatcher().dispatch(
                    self.state.clone(),
                    invocation_id,
                    action.to_string(),
                    input_bytes,
                );
                Ok(ActionHandle::pending(action, invocation_id, receiver))
            }
        }
    }

    /// Call an action and wait for its result
    ///
    /// Equivalent to `schedule` followed immediately by `wait`.
    pub async fn call<I, O>(&self, action: &str, input: I) -> Result<O, WorkflowError>
    where
        I: serde::Serialize,
        O: serde::de::DeserializeOwned,
    {
        self.schedule(action, input)?.wait().await
    }

    /// Run a child workflow and wait for its result
    ///
    /// The child is an invocation of the same kind as an action call: it
    /// gets its own invocation id in this run, its own run id and log, and
    /// participates in the same replay rule recursively.
    pub async fn run_child<I, O>(&self, workflow: &str, input: I) -> Result<O, WorkflowError>
    where
        I: serde::Serialize,
        O: serde::de::DeserializeOwned,
    {
        let input_bytes = serde_json::to_vec(&input)
            .map_err(|e| WorkflowError::SerializationError(e.to_string()))?;

        let outcome = match self.state.begin_child(workflow, &input_bytes)? {
            ChildDisposition::Replayed { outcome } => outcome,
            ChildDisposition::Execute {
                invocation_id,
                child_run_id,
            } => {
                let outcome = self
                    .runtime
                    .run_workflow_raw(&child_run_id, workflow, input_bytes)
                    .await;
                self.state.record_child_result(invocation_id, &outcome)?;
                outcome
            }
        };

        let bytes = outcome?;
        serde_json::from_slice(&bytes)
            .map_err(|e| WorkflowError::DeserializationError(e.to_string()))
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("run_id", &self.run_id)
            .finish()
    }
}

/// Typed handle to a workflow run started in the background
///
/// Returned by `WorkflowRuntime::start_workflow`; resolves through the
/// runtime's event notifications.
pub struct RunHandle<O> {
    run_id: String,
    receiver: broadcast::Receiver<WorkflowEvent>,
    _phantom: PhantomData<fn() -> O>,
}

impl<O> RunHandle<O>
where
    O: serde::de::DeserializeOwned,
{
    pub(crate) fn new(run_id: String, receiver: broadcast::Receiver<WorkflowEvent>) -> Self {
        Self {
            run_id,
            receiver,
            _phantom: PhantomData,
        }
    }

    /// Get the run id
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Wait for the run to reach its terminal state and decode the result
    pub async fn wait_for_completion(mut self) -> Result<O, WorkflowError> {
        loop {
            match self.receiver.recv().await {
                Ok(WorkflowEvent::Completed { run_id, result }) if run_id == self.run_id => {
                    return serde_json::from_slice(&result)
                        .map_err(|e| WorkflowError::DeserializationError(e.to_string()));
                }
                Ok(WorkflowEvent::Failed { run_id, error }) if run_id == self.run_id => {
                    return Err(error);
                }
                Ok(_) => {
                    // Event for another run, or a non-terminal notification
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Continue on lag
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(WorkflowError::ExecutionError(
                        "event channel closed".to_string(),
                    ));
                }
            }
        }
    }
}
