//! A `redb`-backed [`WorkflowStore`], for processes that need their event
//! log and checkpoints to survive a restart.

use std::sync::Arc;

use async_trait::async_trait;
use snafu::prelude::*;

use crate::durable::checkpoint::{ActiveWorkflowInfo, Checkpoint};
use crate::durable::events::{EventKind, LoggedEvent};

use super::{Error, Result, SerializationSnafu, WorkflowStore};

const EVENTS_TABLE: redb::TableDefinition<&str, &[u8]> = redb::TableDefinition::new("events");
const CHECKPOINTS_TABLE: redb::TableDefinition<&str, &[u8]> = redb::TableDefinition::new("checkpoints");
const ACTIVE_TABLE: redb::TableDefinition<&str, &str> = redb::TableDefinition::new("active");

fn database_error(e: impl std::fmt::Display) -> Error {
    Error::Database { message: e.to_string() }
}

/// Durable storage for event logs and checkpoints backed by an embedded
/// `redb` database file.
#[derive(Debug)]
pub struct RedbStore {
    db: Arc<redb::Database>,
}

impl RedbStore {
    pub fn new(path: &str) -> Result<Self> {
        let db = redb::Database::create(path).map_err(database_error)?;
        let write_txn = db.begin_write().map_err(database_error)?;
        {
            write_txn.open_table(EVENTS_TABLE).map_err(database_error)?;
            write_txn.open_table(CHECKPOINTS_TABLE).map_err(database_error)?;
            write_txn.open_table(ACTIVE_TABLE).map_err(database_error)?;
        }
        write_txn.commit().map_err(database_error)?;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl WorkflowStore for RedbStore {
    async fn append_event(&self, workflow_id: &str, event: LoggedEvent) -> Result<()> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let workflow_type = match &event.kind {
                EventKind::WorkflowStarted { workflow_type, .. } => Some(workflow_type.clone()),
                _ => None,
            };

            let write_txn = db.begin_write().map_err(database_error)?;
            {
                let mut events_table = write_txn.open_table(EVENTS_TABLE).map_err(database_error)?;
                let existing = events_table.get(workflow_id.as_str()).map_err(database_error)?;
                if existing.is_none() && !matches!(event.kind, EventKind::WorkflowStarted { .. }) {
                    return Err(database_error(format!(
                        "first event for workflow '{workflow_id}' must be workflow.started"
                    )));
                }
                let mut events: Vec<LoggedEvent> = match existing {
                    Some(value) => serde_json::from_slice(value.value()).context(SerializationSnafu)?,
                    None => Vec::new(),
                };
                events.push(event);
                let encoded = serde_json::to_vec(&events).context(SerializationSnafu)?;
                events_table.insert(workflow_id.as_str(), encoded.as_slice()).map_err(database_error)?;
            }
            if let Some(workflow_type) = workflow_type {
                let mut active_table = write_txn.open_table(ACTIVE_TABLE).map_err(database_error)?;
                active_table.insert(workflow_id.as_str(), workflow_type.as_str()).map_err(database_error)?;
            }
            write_txn.commit().map_err(database_error)?;
            Ok(())
        })
        .await
        .map_err(database_error)?
    }

    async fn get_events(&self, workflow_id: &str) -> Result<Vec<LoggedEvent>> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<LoggedEvent>> {
            let read_txn = db.begin_read().map_err(database_error)?;
            let table = read_txn.open_table(EVENTS_TABLE).map_err(database_error)?;
            match table.get(workflow_id.as_str()).map_err(database_error)? {
                Some(value) => serde_json::from_slice(value.value()).context(SerializationSnafu),
                None => Ok(Vec::new()),
            }
        })
        .await
        .map_err(database_error)?
    }

    async fn get_events_after(&self, workflow_id: &str, sequence: u64) -> Result<Vec<LoggedEvent>> {
        Ok(self
            .get_events(workflow_id)
            .await?
            .into_iter()
            .filter(|e| e.sequence > sequence)
            .collect())
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(database_error)?;
            {
                let mut table = write_txn.open_table(CHECKPOINTS_TABLE).map_err(database_error)?;
                let encoded = serde_json::to_vec(&checkpoint).context(SerializationSnafu)?;
                table.insert(checkpoint.workflow_id.as_str(), encoded.as_slice()).map_err(database_error)?;
            }
            write_txn.commit().map_err(database_error)?;
            Ok(())
        })
        .await
        .map_err(database_error)?
    }

    async fn get_latest_checkpoint(&self, workflow_id: &str) -> Result<Option<Checkpoint>> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Checkpoint>> {
            let read_txn = db.begin_read().map_err(database_error)?;
            let table = read_txn.open_table(CHECKPOINTS_TABLE).map_err(database_error)?;
            match table.get(workflow_id.as_str()).map_err(database_error)? {
                Some(value) => Ok(Some(serde_json::from_slice(value.value()).context(SerializationSnafu)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(database_error)?
    }

    async fn list_active_workflows(&self) -> Result<Vec<ActiveWorkflowInfo>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ActiveWorkflowInfo>> {
            let read_txn = db.begin_read().map_err(database_error)?;
            let table = read_txn.open_table(ACTIVE_TABLE).map_err(database_error)?;
            let mut active = Vec::new();
            for item in table.iter().map_err(database_error)? {
                let (key, value) = item.map_err(database_error)?;
                active.push(ActiveWorkflowInfo {
                    workflow_id: key.value().to_string(),
                    workflow_type: value.value().to_string(),
                });
            }
            Ok(active)
        })
        .await
        .map_err(database_error)?
    }

    async fn mark_completed(&self, workflow_id: &str) -> Result<()> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(database_error)?;
            {
                let mut table = write_txn.open_table(ACTIVE_TABLE).map_err(database_error)?;
                table.remove(workflow_id.as_str()).map_err(database_error)?;
            }
            write_txn.commit().map_err(database_error)?;
            Ok(())
        })
        .await
        .map_err(database_error)?
    }
}
