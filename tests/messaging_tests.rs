//! End-to-end tests for signals and queries against a live `Execution`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use workflow_engine::context::Context;
use workflow_engine::execution::Execution;
use workflow_engine::signal::{self, QueryDefinition, SignalDefinition};

#[tokio::test]
async fn query_reads_the_current_context_through_a_registered_handler() {
    let exec = Execution::new("wf-1", "Demo", Context::from_value(json!({"count": 2})));
    exec.set_query_handler(
        &QueryDefinition::new("count"),
        Arc::new(|_args: serde_json::Value| json!(2)),
    )
    .await;

    let value = exec.query("count", json!([])).await.unwrap();
    assert_eq!(value, json!(2));
}

#[tokio::test]
async fn signal_delivered_before_registration_is_replayed_in_order() {
    let exec = Execution::new("wf-1", "Demo", Context::new());
    exec.signal("approve", json!(["alice"])).await.unwrap();
    exec.signal("approve", json!(["bob"])).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let calls_clone = calls.clone();
    exec.set_signal_handler(
        &SignalDefinition::new("approve"),
        Arc::new(move |args: serde_json::Value| {
            let seen = seen_clone.clone();
            let calls = calls_clone.clone();
            async move {
                seen.lock().await.push(args);
                calls.fetch_add(1, Ordering::SeqCst);
            }
        }),
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(*seen.lock().await, vec![json!(["alice"]), json!(["bob"])]);
}

#[tokio::test]
async fn signal_after_finalize_is_rejected() {
    let exec = Execution::new("wf-1", "Demo", Context::new());
    exec.finalize().await;

    let err = exec.signal("approve", json!([])).await.unwrap_err();
    assert!(matches!(err, signal::Error::Completed { .. }));
}

#[tokio::test]
async fn query_still_works_after_the_workflow_has_completed() {
    let exec = Execution::new("wf-1", "Demo", Context::new());
    exec.set_query_handler(&QueryDefinition::new("status"), Arc::new(|_| json!("idle")))
        .await;
    exec.finalize().await;

    assert_eq!(exec.query("status", json!([])).await.unwrap(), json!("idle"));
}
