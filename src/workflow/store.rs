//! Event log storage
//!
//! The engine consumes storage through the `EventStore` trait; durable
//! backends plug in behind it. The in-memory implementation here backs
//! tests and single-process embedding.

use crate::workflow::event::{EventKind, EventLogEntry};
use crate::workflow::StoreError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Append-only, keyed-by-run-id storage for workflow lifecycle events
///
/// Implementations must preserve append order per run id: `read_all`
/// returns entries in the order they were appended. Appends for different
/// run ids never contend on the same log region.
pub trait EventStore: Send + Sync {
    /// Append an event to the run's log
    fn append(&self, run_id: &str, event: EventKind) -> Result<(), StoreError>;

    /// Read the run's full log in append order
    fn read_all(&self, run_id: &str) -> Result<Vec<EventLogEntry>, StoreError>;

    /// True once the run's top-level Completed or Failed event is recorded
    fn is_terminal(&self, run_id: &str) -> Result<bool, StoreError>;
}

/// In-memory event store
#[derive(Default)]
pub struct InMemoryEventStore {
    logs: Mutex<HashMap<String, Vec<EventLogEntry>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl EventStore for InMemoryEventStore {
    fn append(&self, run_id: &str, event: EventKind) -> Result<(), StoreError> {
        let mut logs = self.logs.lock().unwrap();
        let log = logs.entry(run_id.to_string()).or_default();
        let entry = EventLogEntry {
            run_id: run_id.to_string(),
            sequence: log.len() as u64,
            timestamp_ms: now_ms(),
            event,
        };
        log.push(entry);
        Ok(())
    }

    fn read_all(&self, run_id: &str) -> Result<Vec<EventLogEntry>, StoreError> {
        let logs = self.logs.lock().unwrap();
        Ok(logs.get(run_id).cloned().unwrap_or_default())
    }

    fn is_terminal(&self, run_id: &str) -> Result<bool, StoreError> {
        let logs = self.logs.lock().unwrap();
        let terminal = logs.get(run_id).map_or(false, |log| {
            log.iter().any(|entry| {
                matches!(
                    entry.event,
                    EventKind::WorkflowCompleted { .. } | EventKind::WorkflowFailed { .. }
                )
            })
        });
        Ok(terminal)
    }
}
