pub mod workflow;

pub use workflow::{
    ActionFunction, ActionHandle, ActionRegistry, EventKind, EventLogEntry, EventStore,
    InMemoryEventStore, RunHandle, RuntimeConfig, StoreError, WorkflowContext, WorkflowError,
    WorkflowEvent, WorkflowFunction, WorkflowRegistry, WorkflowRuntime, WorkflowStatus,
};
