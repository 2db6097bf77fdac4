//! End-to-end tests for durable execution: a workflow started through the
//! public handle survives to completion and leaves a replayable event log.

use std::sync::Arc;

use serde_json::json;

use workflow_engine::demos;
use workflow_engine::durable::events::EventKind;
use workflow_engine::handle::start_workflow;
use workflow_engine::store::{InMemoryStore, WorkflowStore};

#[tokio::test]
async fn a_durable_workflow_runs_to_completion_and_is_marked_done() {
    let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());

    let handle = start_workflow("wf-durable-1", "GreetDurable", store.clone(), demos::greet_durable(), json!({"name": "ada"}))
        .await
        .unwrap();

    assert_eq!(handle.workflow_id(), "wf-durable-1");
    assert_eq!(handle.workflow_type(), "GreetDurable");
    assert!(!handle.is_completed());

    let result = handle.result().await;
    assert!(result.good());
    assert!(handle.is_completed());

    assert!(store.list_active_workflows().await.unwrap().is_empty());
}

#[tokio::test]
async fn the_event_log_records_the_run_from_start_to_finish() {
    let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
    let handle = start_workflow("wf-durable-2", "GreetDurable", store, demos::greet_durable(), json!({"name": "grace"}))
        .await
        .unwrap();
    let _ = handle.result().await;

    let events = handle.events(None).await.unwrap();
    assert!(matches!(events.first().unwrap().kind, EventKind::WorkflowStarted { .. }));
    assert!(matches!(events.last().unwrap().kind, EventKind::WorkflowCompleted { .. }));
    assert!(events.iter().any(|e| matches!(&e.kind, EventKind::StepCompleted { step, .. } if step == "compute-greeting")));
    assert!(events.iter().any(|e| matches!(e.kind, EventKind::SleepCompleted { .. })));
}

#[tokio::test]
async fn a_checkpoint_is_saved_and_reflects_the_final_status() {
    let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
    let handle = start_workflow("wf-durable-3", "GreetDurable", store, demos::greet_durable(), json!({"name": "lin"}))
        .await
        .unwrap();
    let _ = handle.result().await;

    let checkpoint = handle.checkpoint().await.unwrap().expect("checkpoint saved on finalize");
    assert_eq!(checkpoint.completed_steps, vec!["compute-greeting".to_string()]);
}

#[tokio::test]
async fn events_after_a_sequence_number_excludes_earlier_ones() {
    let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
    let handle = start_workflow("wf-durable-4", "GreetDurable", store, demos::greet_durable(), json!({"name": "mae"}))
        .await
        .unwrap();
    let _ = handle.result().await;

    let all = handle.events(None).await.unwrap();
    let after = handle.events(Some(0)).await.unwrap();
    assert!(after.len() < all.len());
    assert!(after.iter().all(|e| e.sequence > 0));
}
