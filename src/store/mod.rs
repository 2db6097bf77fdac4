//! Durable persistence for a workflow's event log and checkpoints.

pub mod redb_store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use snafu::prelude::*;

use crate::durable::checkpoint::{ActiveWorkflowInfo, Checkpoint};
use crate::durable::events::LoggedEvent;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no workflow found with id '{workflow_id}'"))]
    NotFound { workflow_id: String },
    #[snafu(display("database error: {message}"))]
    Database { message: String },
    #[snafu(display("serialization error: {source}"))]
    Serialization { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Durable storage for event logs and checkpoints. The core ships only the
/// in-memory implementation below; a production deployment supplies a
/// durable one (Postgres, SQLite, …) as an external collaborator.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn append_event(&self, workflow_id: &str, event: LoggedEvent) -> Result<()>;
    async fn get_events(&self, workflow_id: &str) -> Result<Vec<LoggedEvent>>;
    async fn get_events_after(&self, workflow_id: &str, sequence: u64) -> Result<Vec<LoggedEvent>>;
    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<()>;
    async fn get_latest_checkpoint(&self, workflow_id: &str) -> Result<Option<Checkpoint>>;
    async fn list_active_workflows(&self) -> Result<Vec<ActiveWorkflowInfo>>;
    async fn mark_completed(&self, workflow_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct Record {
    workflow_type: String,
    events: Vec<LoggedEvent>,
    checkpoint: Option<Checkpoint>,
    active: bool,
}

/// An in-process `WorkflowStore`, keyed by workflow id. Poisoning-tolerant:
/// a panic while a lock is held must not make every subsequent store
/// operation fail.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Arc<Mutex<HashMap<String, Record>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Record>> {
        self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn append_event(&self, workflow_id: &str, event: LoggedEvent) -> Result<()> {
        let mut records = self.lock();
        if !records.contains_key(workflow_id) && !matches!(event.kind, crate::durable::events::EventKind::WorkflowStarted { .. }) {
            return Err(Error::Database {
                message: format!("first event for workflow '{workflow_id}' must be workflow.started"),
            });
        }
        let record = records.entry(workflow_id.to_string()).or_insert_with(|| Record {
            active: true,
            ..Record::default()
        });
        if let crate::durable::events::EventKind::WorkflowStarted { workflow_type, .. } = &event.kind {
            record.workflow_type = workflow_type.clone();
        }
        record.events.push(event);
        Ok(())
    }

    async fn get_events(&self, workflow_id: &str) -> Result<Vec<LoggedEvent>> {
        Ok(self.lock().get(workflow_id).map(|r| r.events.clone()).unwrap_or_default())
    }

    async fn get_events_after(&self, workflow_id: &str, sequence: u64) -> Result<Vec<LoggedEvent>> {
        Ok(self
            .lock()
            .get(workflow_id)
            .map(|r| r.events.iter().filter(|e| e.sequence > sequence).cloned().collect())
            .unwrap_or_default())
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut records = self.lock();
        let record = records
            .entry(checkpoint.workflow_id.clone())
            .or_insert_with(|| Record {
                workflow_type: checkpoint.workflow_type.clone(),
                active: true,
                ..Record::default()
            });
        record.checkpoint = Some(checkpoint);
        Ok(())
    }

    async fn get_latest_checkpoint(&self, workflow_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.lock().get(workflow_id).and_then(|r| r.checkpoint.clone()))
    }

    async fn list_active_workflows(&self) -> Result<Vec<ActiveWorkflowInfo>> {
        Ok(self
            .lock()
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(workflow_id, record)| ActiveWorkflowInfo {
                workflow_id: workflow_id.clone(),
                workflow_type: record.workflow_type.clone(),
            })
            .collect())
    }

    async fn mark_completed(&self, workflow_id: &str) -> Result<()> {
        let mut records = self.lock();
        let record = records.get_mut(workflow_id).context(NotFoundSnafu { workflow_id })?;
        record.active = false;
        Ok(())
    }
}
