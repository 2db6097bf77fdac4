//! Point-in-time snapshots of a durable run, used to bound replay.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Running,
    Completed,
    Failed,
}

/// A durably-stored snapshot sufficient to resume a workflow without
/// replaying events prior to `sequence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub workflow_type: String,
    pub sequence: u64,
    pub context: Value,
    pub status: CheckpointStatus,
    pub completed_steps: Vec<String>,
    pub condition_counter: u64,
    pub sleep_counter: u64,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn completed_steps_set(&self) -> HashSet<String> {
        self.completed_steps.iter().cloned().collect()
    }
}

/// The minimal projection [`crate::recovery::RecoveryCoordinator`] needs to
/// enumerate and reconstruct active workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveWorkflowInfo {
    pub workflow_id: String,
    pub workflow_type: String,
}
