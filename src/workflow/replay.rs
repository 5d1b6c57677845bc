//! Per-run replay state
//!
//! Rebuilt from the event log when a run starts. Invocation ids are
//! allocated monotonically in the order the workflow body issues calls;
//! a recorded invocation at the same id must match the call being issued,
//! and a recorded terminal outcome is substituted for execution.

use crate::workflow::error::{decode_error, encode_error};
use crate::workflow::event::EventKind;
use crate::workflow::store::EventStore;
use crate::workflow::{EventLogEntry, WorkflowError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// What a recorded invocation was: an action call or a child workflow call
#[derive(Clone, Debug, PartialEq)]
enum InvocationKind {
    Action { action: String },
    Child { workflow: String, child_run_id: String },
}

/// One invocation reconstructed from the log
struct RecordedInvocation {
    kind: InvocationKind,
    input: Vec<u8>,
    /// Terminal outcome, if the log holds a Completed/Failed entry
    outcome: Option<Result<Vec<u8>, WorkflowError>>,
}

/// Decision for an action call the workflow body just issued
pub(crate) enum ActionDisposition {
    /// The log already holds a terminal outcome; no side effect runs
    Replayed {
        invocation_id: u64,
        outcome: Result<Vec<u8>, WorkflowError>,
    },
    /// The invocation must execute (fresh, or re-dispatched after an
    /// interrupted attempt)
    Execute { invocation_id: u64 },
}

/// Decision for a child workflow call
pub(crate) enum ChildDisposition {
    Replayed {
        outcome: Result<Vec<u8>, WorkflowError>,
    },
    Execute {
        invocation_id: u64,
        child_run_id: String,
    },
}

struct Inner {
    next_invocation_id: u64,
    recorded: HashMap<u64, RecordedInvocation>,
    /// Invocations with a terminal event, recorded or appended this run;
    /// guards the one-terminal-per-invocation rule
    terminals: HashSet<u64>,
}

/// Shared mutable state for one executing run
pub(crate) struct RunState {
    run_id: String,
    store: Arc<dyn EventStore>,
    inner: Mutex<Inner>,
}

impl RunState {
    /// Rebuild replay state from a run's log entries
    pub fn from_log(
        run_id: &str,
        store: Arc<dyn EventStore>,
        entries: &[EventLogEntry],
    ) -> Result<Self, WorkflowError> {
        let mut recorded: HashMap<u64, RecordedInvocation> = HashMap::new();
        let mut terminals = HashSet::new();

        for entry in entries {
            match &entry.event {
                EventKind::ActionScheduled {
                    invocation_id,
                    action,
                    input,
                } => {
                    recorded.insert(
                        *invocation_id,
                        RecordedInvocation {
                            kind: InvocationKind::Action {
                                action: action.clone(),
                            },
                            input: input.clone(),
                            outcome: None,
                        },
                    );
                }
                EventKind::ChildScheduled {
                    invocation_id,
                    workflow,
                    child_run_id,
                    input,
                } => {
                    recorded.insert(
                        *invocation_id,
                        RecordedInvocation {
                            kind: InvocationKind::Child {
                                workflow: workflow.clone(),
                                child_run_id: child_run_id.clone(),
                            },
                            input: input.clone(),
                            outcome: None,
                        },
                    );
                }
                EventKind::ActionCompleted {
                    invocation_id,
                    result,
                }
                | EventKind::ChildCompleted {
                    invocation_id,
                    result,
                } => {
                    if let Some(rec) = recorded.get_mut(invocation_id) {
                        rec.outcome = Some(Ok(result.clone()));
                        terminals.insert(*invocation_id);
                    }
                }
                EventKind::ActionFailed {
                    invocation_id,
                    error,
                }
                | EventKind::ChildFailed {
                    invocation_id,
                    error,
                } => {
                    if let Some(rec) = recorded.get_mut(invocation_id) {
                        rec.outcome = Some(Err(decode_error(error)?));
                        terminals.insert(*invocation_id);
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            run_id: run_id.to_string(),
            store,
            inner: Mutex::new(Inner {
                next_invocation_id: 0,
                recorded,
                terminals,
            }),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Allocate the next invocation id for an action call and decide
    /// between replay and execution
    ///
    /// Appends the `ActionScheduled` event for invocations the log has not
    /// seen. A recorded invocation at the allocated id that differs in
    /// kind, action name, or input is a replay divergence.
    pub fn begin_action(
        &self,
        action: &str,
        input: &[u8],
    ) -> Result<ActionDisposition, WorkflowError> {
        let mut inner = self.inner.lock().unwrap();
        let invocation_id = inner.next_invocation_id;
        inner.next_invocation_id += 1;

        match inner.recorded.get(&invocation_id) {
            Some(rec) => {
                let recorded_action = match &rec.kind {
                    InvocationKind::Action { action } => action,
                    InvocationKind::Child { workflow, .. } => {
                        return Err(self.diverged(
                            invocation_id,
                            &format!(
                                "recorded child workflow '{}', body issued action '{}'",
                                workflow, action
                            ),
                        ));
                    }
                };
                if recorded_action != action {
                    return Err(self.diverged(
                        invocation_id,
                        &format!(
                            "recorded action '{}', body issued action '{}'",
                            recorded_action, action
                        ),
                    ));
                }
                if rec.input != input {
                    return Err(self.diverged(
                        invocation_id,
                        &format!("input bytes differ for action '{}'", action),
                    ));
                }
                match &rec.outcome {
                    Some(outcome) => Ok(ActionDisposition::Replayed {
                        invocation_id,
                        outcome: outcome.clone(),
                    }),
                    // Scheduled but never terminated: the previous attempt
                    // was interrupted, so run it again
                    None => Ok(ActionDisposition::Execute { invocation_id }),
                }
            }
            None => {
                self.store.append(
                    &self.run_id,
                    EventKind::ActionScheduled {
                        invocation_id,
                        action: action.to_string(),
                        input: input.to_vec(),
                    },
                )?;
                Ok(ActionDisposition::Execute { invocation_id })
            }
        }
    }

    /// Allocate the next invocation id for a child workflow call
    ///
    /// The child run id is derived on the first attempt and recorded in
    /// `ChildScheduled`; resume reuses the recorded id.
    pub fn begin_child(
        &self,
        workflow: &str,
        input: &[u8],
    ) -> Result<ChildDisposition, WorkflowError> {
        let mut inner = self.inner.lock().unwrap();
        let invocation_id = inner.next_invocation_id;
        inner.next_invocation_id += 1;

        match inner.recorded.get(&invocation_id) {
            Some(rec) => {
                let (recorded_workflow, child_run_id) = match &rec.kind {
                    InvocationKind::Child {
                        workflow,
                        child_run_id,
                    } => (workflow, child_run_id),
                    InvocationKind::Action { action } => {
                        return Err(self.diverged(
                            invocation_id,
                            &format!(
                                "recorded action '{}', body issued child workflow '{}'",
                                action, workflow
                            ),
                        ));
                    }
                };
                if recorded_workflow != workflow {
                    return Err(self.diverged(
                        invocation_id,
                        &format!(
                            "recorded child workflow '{}', body issued child workflow '{}'",
                            recorded_workflow, workflow
                        ),
                    ));
                }
                if rec.input != input {
                    return Err(self.diverged(
                        invocation_id,
                        &format!("input bytes differ for child workflow '{}'", workflow),
                    ));
                }
                match &rec.outcome {
                    Some(outcome) => Ok(ChildDisposition::Replayed {
                        outcome: outcome.clone(),
                    }),
                    None => Ok(ChildDisposition::Execute {
                        invocation_id,
                        child_run_id: child_run_id.clone(),
                    }),
                }
            }
            None => {
                let child_run_id = format!("{}/{}", self.run_id, invocation_id);
                self.store.append(
                    &self.run_id,
                    EventKind::ChildScheduled {
                        invocation_id,
                        workflow: workflow.to_string(),
                        child_run_id: child_run_id.clone(),
                        input: input.to_vec(),
                    },
                )?;
                Ok(ChildDisposition::Execute {
                    invocation_id,
                    child_run_id,
                })
            }
        }
    }

    /// Append an `ActionStarted` event for an execution attempt
    pub fn append_started(&self, invocation_id: u64) -> Result<(), WorkflowError> {
        self.store
            .append(&self.run_id, EventKind::ActionStarted { invocation_id })?;
        Ok(())
    }

    /// Record an action invocation's terminal event
    ///
    /// An invocation is immutable once terminal: a second record for the
    /// same id is a no-op.
    pub fn record_action_result(
        &self,
        invocation_id: u64,
        outcome: &Result<Vec<u8>, WorkflowError>,
    ) -> Result<(), WorkflowError> {
        let event = match outcome {
            Ok(result) => EventKind::ActionCompleted {
                invocation_id,
                result: result.clone(),
            },
            Err(error) => EventKind::ActionFailed {
                invocation_id,
                error: encode_error(error)?,
            },
        };
        self.record_terminal(invocation_id, event)
    }

    /// Record a child invocation's terminal event in the parent log
    pub fn record_child_result(
        &self,
        invocation_id: u64,
        outcome: &Result<Vec<u8>, WorkflowError>,
    ) -> Result<(), WorkflowError> {
        let event = match outcome {
            Ok(result) => EventKind::ChildCompleted {
                invocation_id,
                result: result.clone(),
            },
            Err(error) => EventKind::ChildFailed {
                invocation_id,
                error: encode_error(error)?,
            },
        };
        self.record_terminal(invocation_id, event)
    }

    fn record_terminal(&self, invocation_id: u64, event: EventKind) -> Result<(), WorkflowError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.terminals.insert(invocation_id) {
            return Ok(());
        }
        self.store.append(&self.run_id, event)?;
        Ok(())
    }

    fn diverged(&self, invocation_id: u64, detail: &str) -> WorkflowError {
        WorkflowError::ReplayDiverged {
            run_id: self.run_id.clone(),
            detail: format!("invocation {}: {}", invocation_id, detail),
        }
    }
}
