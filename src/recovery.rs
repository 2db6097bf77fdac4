//! Recovers in-flight workflows after a crash by replaying their durable
//! event logs against freshly constructed workflow bodies.

use std::collections::HashMap;
use std::sync::Arc;

use snafu::prelude::*;

use crate::context::Context;
use crate::durable::{self, DurableExecution};
use crate::execution::Execution;
use crate::handle::{self, WorkflowFn, WorkflowHandle};
use crate::store::{self, WorkflowStore};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("store error: {source}"))]
    Store { source: store::Error },
    #[snafu(display("durable engine error recovering '{workflow_id}': {source}"))]
    Durable { workflow_id: String, source: durable::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Registry of workflow bodies recoverable after a restart, and the
/// coordinator that walks a [`WorkflowStore`] to reconstruct them.
#[derive(Default, Clone)]
pub struct RecoveryCoordinator {
    workflows: HashMap<String, Arc<WorkflowFn>>,
}

impl RecoveryCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, workflow_type: impl Into<String>, body: Arc<WorkflowFn>) {
        self.workflows.insert(workflow_type.into(), body);
    }

    /// Enumerate every workflow the store considers still active, rebuild
    /// a [`DurableExecution`] for each in replay mode, and hand back a
    /// handle per recovered workflow. Active workflows of an unregistered
    /// type are skipped with a logged warning rather than failing the
    /// whole batch.
    pub async fn recover_all(&self, store: Arc<dyn WorkflowStore>) -> Result<Vec<WorkflowHandle>> {
        let active = store.list_active_workflows().await.context(StoreSnafu)?;
        let mut recovered = Vec::with_capacity(active.len());

        for info in active {
            let Some(body) = self.workflows.get(&info.workflow_type).cloned() else {
                tracing::warn!(
                    workflow_id = %info.workflow_id,
                    workflow_type = %info.workflow_type,
                    "skipping recovery: unregistered workflow type"
                );
                continue;
            };

            let execution = Arc::new(Execution::new(info.workflow_id.clone(), info.workflow_type.clone(), Context::new()));
            let (durable, args) = DurableExecution::start_recovery(execution, store.clone())
                .await
                .map_err(|source| Error::Durable {
                    workflow_id: info.workflow_id.clone(),
                    source,
                })?;

            let durable = Arc::new(durable);
            let (wf_handle, driver) = handle::make(durable.clone());

            tokio::spawn(async move {
                let result = body(durable.clone(), args).await;
                let _ = durable.finalize(&result).await;
                driver.settle(result);
            });

            recovered.push(wf_handle);
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::events::{EventKind, LoggedEvent};
    use crate::result::{ResultBuilder, State, Status};
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn noop_body() -> Arc<WorkflowFn> {
        Arc::new(|_durable, _args| {
            Box::pin(async move {
                crate::result::Result::new(ResultBuilder {
                    task_name: "Noop".into(),
                    chain_id: uuid::Uuid::nil(),
                    index: 0,
                    state: Some(State::Complete),
                    status: Some(Status::Success),
                    metadata: json!({}),
                    ..ResultBuilder::default()
                })
            })
        })
    }

    #[tokio::test]
    async fn recovery_skips_unregistered_workflow_types() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        store
            .append_event(
                "wf-1",
                LoggedEvent::new(
                    0,
                    EventKind::WorkflowStarted {
                        workflow_type: "Unregistered".into(),
                        args: json!({}),
                    },
                ),
            )
            .await
            .unwrap();

        let coordinator = RecoveryCoordinator::new();
        let recovered = coordinator.recover_all(store).await.unwrap();
        assert!(recovered.is_empty());
    }

    #[tokio::test]
    async fn recovery_rebuilds_and_completes_a_registered_workflow() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        store
            .append_event(
                "wf-1",
                LoggedEvent::new(
                    0,
                    EventKind::WorkflowStarted {
                        workflow_type: "Noop".into(),
                        args: json!({}),
                    },
                ),
            )
            .await
            .unwrap();

        let mut coordinator = RecoveryCoordinator::new();
        coordinator.register("Noop", noop_body());

        let recovered = coordinator.recover_all(store.clone()).await.unwrap();
        assert_eq!(recovered.len(), 1);
        let result = recovered[0].result().await;
        assert!(result.good());
        assert!(store.list_active_workflows().await.unwrap().is_empty());
    }
}
