//! End-to-end tests for the cooperative predicate-wait primitive.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use workflow_engine::context::Context;
use workflow_engine::execution::Execution;
use workflow_engine::signal::SignalDefinition;

#[tokio::test]
async fn condition_already_true_resolves_without_waiting() {
    let exec = Execution::new("wf-1", "Demo", Context::from_value(json!({"ready": true})));
    let resolved = exec
        .condition(Arc::new(|ctx: &Context| ctx.get("ready").and_then(|v| v.as_bool()).unwrap_or(false)), None)
        .await;
    assert!(resolved);
}

#[tokio::test]
async fn condition_resolves_once_context_changes_via_a_signal() {
    let exec = Arc::new(Execution::new("wf-1", "Demo", Context::from_value(json!({"ready": false}))));
    let waiter_exec = exec.clone();
    let waiter = tokio::spawn(async move {
        waiter_exec
            .condition(
                Arc::new(|ctx: &Context| ctx.get("ready").and_then(|v| v.as_bool()).unwrap_or(false)),
                Some(Duration::from_secs(5)),
            )
            .await
    });

    tokio::task::yield_now().await;
    exec.set_context(Context::from_value(json!({"ready": true}))).await;
    exec.set_signal_handler(&SignalDefinition::new("nudge"), Arc::new(|_: serde_json::Value| async {}))
        .await;
    exec.signal("nudge", json!([])).await.unwrap();

    assert!(waiter.await.unwrap());
}

#[tokio::test]
async fn condition_times_out_without_a_nudge() {
    let exec = Execution::new("wf-1", "Demo", Context::new());
    let resolved = exec
        .condition(Arc::new(|_: &Context| false), Some(Duration::from_millis(20)))
        .await;
    assert!(!resolved);
}

#[tokio::test]
async fn multiple_waiters_resolve_independently() {
    let exec = Arc::new(Execution::new("wf-1", "Demo", Context::from_value(json!({"a": false, "b": false}))));

    let a_exec = exec.clone();
    let a_waiter = tokio::spawn(async move {
        a_exec
            .condition(Arc::new(|ctx: &Context| ctx.get("a").and_then(|v| v.as_bool()).unwrap_or(false)), None)
            .await
    });
    let b_exec = exec.clone();
    let b_waiter = tokio::spawn(async move {
        b_exec
            .condition(
                Arc::new(|ctx: &Context| ctx.get("b").and_then(|v| v.as_bool()).unwrap_or(false)),
                Some(Duration::from_millis(20)),
            )
            .await
    });

    tokio::task::yield_now().await;
    exec.set_context(Context::from_value(json!({"a": true, "b": false}))).await;
    exec.set_signal_handler(&SignalDefinition::new("nudge"), Arc::new(|_: serde_json::Value| async {}))
        .await;
    exec.signal("nudge", json!([])).await.unwrap();

    assert!(a_waiter.await.unwrap());
    assert!(!b_waiter.await.unwrap());
}
