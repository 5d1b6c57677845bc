//! Durable log entries and runtime notifications

use crate::workflow::WorkflowError;
use serde::{Deserialize, Serialize};

/// Lifecycle events appended to a run's event log
///
/// Inputs and results are serialized payloads; errors are serialized
/// `WorkflowError` values. Entries are never mutated once appended, and the
/// order within a run determines replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// The top-level workflow began executing
    WorkflowStarted { workflow: String, input: Vec<u8> },
    /// The top-level workflow returned a value
    WorkflowCompleted { result: Vec<u8> },
    /// The top-level workflow returned an error
    WorkflowFailed { error: Vec<u8> },
    /// The workflow body issued an action call
    ActionScheduled {
        invocation_id: u64,
        action: String,
        input: Vec<u8>,
    },
    /// An attempt to execute the invocation began
    ActionStarted { invocation_id: u64 },
    /// The invocation produced a result
    ActionCompleted { invocation_id: u64, result: Vec<u8> },
    /// The invocation produced an error
    ActionFailed { invocation_id: u64, error: Vec<u8> },
    /// The workflow body issued a child workflow call
    ChildScheduled {
        invocation_id: u64,
        workflow: String,
        child_run_id: String,
        input: Vec<u8>,
    },
    /// The child run returned a value
    ChildCompleted { invocation_id: u64, result: Vec<u8> },
    /// The child run returned an error
    ChildFailed { invocation_id: u64, error: Vec<u8> },
}

/// One appended entry in a run's event log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub run_id: String,
    /// Position within the run's log, assigned by the store
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub event: EventKind,
}

/// Status of a workflow run, derived from its log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

/// Notifications broadcast by the runtime as runs make progress
#[derive(Clone, Debug)]
pub enum WorkflowEvent {
    /// A workflow run has started executing
    Started { run_id: String, workflow: String },
    /// An action invocation completed
    ActionCompleted {
        run_id: String,
        invocation_id: u64,
        action: String,
    },
    /// An action invocation failed
    ActionFailed {
        run_id: String,
        invocation_id: u64,
        action: String,
        error: WorkflowError,
    },
    /// A workflow run completed with a serialized result
    Completed { run_id: String, result: Vec<u8> },
    /// A workflow run failed
    Failed { run_id: String, error: WorkflowError },
}
