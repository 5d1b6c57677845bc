use serde::{Deserialize, Serialize};

/// Errors that can occur during workflow operations
///
/// The error type is serializable because failed invocations are recorded
/// verbatim in the event log and replayed on later runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkflowError {
    /// An action's own failure, recorded as the invocation's terminal state
    ActionFailed { action: String, message: String },
    /// On replay, the workflow body issued a different call sequence than
    /// the one recorded in the event log
    ReplayDiverged { run_id: String, detail: String },
    /// The event store failed to append or read
    StoreUnavailable(String),
    /// No workflow registered under this name
    WorkflowNotFound(String),
    /// No action registered under this name
    ActionNotFound(String),
    /// A function with this name is already registered
    AlreadyRegistered(String),
    /// Serialization error
    SerializationError(String),
    /// Deserialization error
    DeserializationError(String),
    /// An execution task was dropped before resolving
    ExecutionError(String),
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowError::ActionFailed { action, message } => {
                write!(f, "Action '{}' failed: {}", action, message)
            }
            WorkflowError::ReplayDiverged { run_id, detail } => {
                write!(f, "Replay diverged for run '{}': {}", run_id, detail)
            }
            WorkflowError::StoreUnavailable(msg) => write!(f, "Event store unavailable: {}", msg),
            WorkflowError::WorkflowNotFound(name) => write!(f, "Workflow '{}' not found", name),
            WorkflowError::ActionNotFound(name) => write!(f, "Action '{}' not found", name),
            WorkflowError::AlreadyRegistered(name) => {
                write!(f, "'{}' is already registered", name)
            }
            WorkflowError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            WorkflowError::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            WorkflowError::ExecutionError(msg) => write!(f, "Execution error: {}", msg),
        }
    }
}

impl std::error::Error for WorkflowError {}

/// Error returned by an `EventStore` implementation
#[derive(Clone, Debug, PartialEq)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        WorkflowError::StoreUnavailable(err.0)
    }
}

/// Serialize an error for storage as a Failed payload
pub(crate) fn encode_error(error: &WorkflowError) -> Result<Vec<u8>, WorkflowError> {
    serde_json::to_vec(error).map_err(|e| WorkflowError::SerializationError(e.to_string()))
}

/// Decode a Failed payload back into the error it recorded
pub(crate) fn decode_error(bytes: &[u8]) -> Result<WorkflowError, WorkflowError> {
    serde_json::from_slice(bytes).map_err(|e| WorkflowError::DeserializationError(e.to_string()))
}
