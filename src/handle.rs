//! A caller-facing handle onto a running (or completed) workflow.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::context::Context;
use crate::durable;
use crate::durable::checkpoint::Checkpoint;
use crate::durable::events::LoggedEvent;
use crate::durable::DurableExecution;
use crate::execution::Execution;
use crate::result::Result as TaskResult;
use crate::signal::{self, QueryDefinition, SignalDefinition};
use crate::store::{self, WorkflowStore};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A durable workflow's body: given the run's [`DurableExecution`] (for
/// `step`/`condition`/`sleep`) and its start args, produces the run's
/// final [`TaskResult`]. Registered once per workflow type name and
/// invoked both for fresh runs and for replay-driven recovery.
pub type WorkflowFn = dyn Fn(Arc<DurableExecution>, Value) -> BoxFuture<TaskResult> + Send + Sync;

/// Handed back from starting a workflow: lets a caller signal/query it
/// while it runs and await its final [`TaskResult`] once it settles.
pub struct WorkflowHandle {
    durable: Arc<DurableExecution>,
    final_result: watch::Receiver<Option<TaskResult>>,
}

impl WorkflowHandle {
    #[must_use]
    pub(crate) fn new(durable: Arc<DurableExecution>, final_result: watch::Receiver<Option<TaskResult>>) -> Self {
        Self { durable, final_result }
    }

    #[must_use]
    pub fn workflow_id(&self) -> &str {
        self.durable.execution.workflow_id()
    }

    #[must_use]
    pub fn workflow_type(&self) -> &str {
        self.durable.execution.workflow_type()
    }

    pub async fn signal(&self, def: &SignalDefinition, args: Value) -> std::result::Result<(), signal::Error> {
        self.durable.signal(def.name(), args).await
    }

    pub async fn query(&self, def: &QueryDefinition, args: Value) -> std::result::Result<Value, signal::Error> {
        self.durable.execution.query(def.name(), args).await
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.final_result.borrow().is_some()
    }

    /// Wait for the workflow to settle and return its final result.
    pub async fn result(&self) -> TaskResult {
        let mut rx = self.final_result.clone();
        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                if let Some(result) = rx.borrow().clone() {
                    return result;
                }
                unreachable!("final_result sender dropped without ever sending a value");
            }
        }
    }

    /// Every durable event logged for this run so far, optionally only
    /// those after `after_sequence`.
    pub async fn events(&self, after_sequence: Option<u64>) -> std::result::Result<Vec<LoggedEvent>, store::Error> {
        match after_sequence {
            Some(sequence) => self.store().get_events_after(self.workflow_id(), sequence).await,
            None => self.store().get_events(self.workflow_id()).await,
        }
    }

    pub async fn checkpoint(&self) -> std::result::Result<Option<Checkpoint>, store::Error> {
        self.store().get_latest_checkpoint(self.workflow_id()).await
    }

    #[must_use]
    pub async fn current_sequence(&self) -> u64 {
        self.durable.current_sequence().await
    }

    #[must_use]
    pub async fn completed_steps(&self) -> std::collections::HashSet<String> {
        self.durable.completed_steps().await
    }

    #[must_use]
    pub async fn is_replaying(&self) -> bool {
        self.durable.is_replaying().await
    }

    fn store(&self) -> &dyn WorkflowStore {
        self.durable.store_ref()
    }

    #[must_use]
    pub fn execution(&self) -> &Arc<Execution> {
        &self.durable.execution
    }

    #[must_use]
    pub fn durable_execution(&self) -> &Arc<DurableExecution> {
        &self.durable
    }
}

/// A durable run in progress: the channel a driver uses to publish the
/// final result once the workflow body returns, paired with the handle
/// callers actually interact with.
pub(crate) struct Driver {
    pub sender: watch::Sender<Option<TaskResult>>,
}

impl Driver {
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<Option<TaskResult>>) {
        let (sender, receiver) = watch::channel(None);
        (Self { sender }, receiver)
    }

    pub fn settle(&self, result: TaskResult) {
        let _ = self.sender.send(Some(result));
    }
}

pub(crate) fn make(durable: Arc<DurableExecution>) -> (WorkflowHandle, Driver) {
    let (driver, receiver) = Driver::new();
    (WorkflowHandle::new(durable, receiver), driver)
}

/// Start a brand-new durable run of `body` and spawn it to completion,
/// returning a handle immediately.
pub async fn start_workflow(
    workflow_id: impl Into<String>,
    workflow_type: impl Into<String>,
    store: Arc<dyn WorkflowStore>,
    body: Arc<WorkflowFn>,
    args: Value,
) -> std::result::Result<WorkflowHandle, durable::Error> {
    let execution = Arc::new(Execution::new(workflow_id.into(), workflow_type.into(), Context::new()));
    let durable = Arc::new(DurableExecution::start_live(execution, store, args.clone()).await?);
    let (handle, driver) = make(durable.clone());

    tokio::spawn(async move {
        let result = body(durable.clone(), args).await;
        let _ = durable.finalize(&result).await;
        driver.settle(result);
    });

    Ok(handle)
}
