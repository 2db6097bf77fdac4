//! The append-only, replayable event log a durable workflow run produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One durable event. Every variant carries a `sequence`/`timestamp` pair
/// via the wrapping [`LoggedEvent`]; the payload here is the
/// event-specific data only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted { workflow_type: String, args: Value },
    WorkflowCompleted { result: Value },
    WorkflowFailed { error: String },
    StepScheduled { step: String },
    StepCompleted { step: String, result: Value },
    StepFailed { step: String, error: String },
    SignalReceived { signal: String, payload: Value },
    ConditionScheduled { key: String, timeout_ms: Option<u64>, deadline: Option<DateTime<Utc>> },
    ConditionSatisfied { key: String },
    ConditionTimeout { key: String },
    SleepScheduled { key: String, duration_ms: u64, deadline: DateTime<Utc> },
    SleepCompleted { key: String },
}

/// A durable event as stored in the log: monotonic `sequence` per
/// workflow, plus the wall-clock time it was appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl LoggedEvent {
    #[must_use]
    pub fn new(sequence: u64, kind: EventKind) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            kind,
        }
    }
}
