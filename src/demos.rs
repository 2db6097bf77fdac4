//! Minimal built-in workflows the CLI can run out of the box, exercising
//! the task pipeline and the durable engine without requiring a caller to
//! bring their own Rust workflow crate.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::chain::Chain;
use crate::context::Context;
use crate::handle::WorkflowFn;
use crate::recovery::RecoveryCoordinator;
use crate::task::{Task, TaskSettings, WorkOutcome};

struct Greet;

#[async_trait]
impl Task for Greet {
    fn name(&self) -> &str {
        "Greet"
    }

    async fn work(&self, ctx: &mut Context, _chain: &Chain) -> WorkOutcome {
        let name = ctx.get("name").and_then(Value::as_str).unwrap_or("world").to_string();
        ctx.set("greeting", json!(format!("hello, {name}")));
        Ok(())
    }
}

struct Shout;

#[async_trait]
impl Task for Shout {
    fn name(&self) -> &str {
        "Shout"
    }

    fn settings(&self) -> TaskSettings {
        TaskSettings::default()
    }

    async fn work(&self, ctx: &mut Context, _chain: &Chain) -> WorkOutcome {
        if let Some(greeting) = ctx.get("greeting").and_then(Value::as_str) {
            ctx.set("greeting", json!(greeting.to_uppercase()));
        }
        Ok(())
    }
}

/// A two-step sequential pipeline: "set a greeting", "shout it". Used by
/// the `run` subcommand's `--demo greet` selection.
#[must_use]
pub fn greet_pipeline() -> Vec<Arc<dyn Task>> {
    vec![Arc::new(Greet), Arc::new(Shout)]
}

/// A durable workflow body: runs one durable step that computes a
/// greeting, waits out a short durable sleep, then finishes. Exercises
/// `DurableExecution::step`/`sleep` and is replay-safe by construction.
#[must_use]
pub fn greet_durable() -> Arc<WorkflowFn> {
    Arc::new(|durable, args| {
        Box::pin(async move {
            let name = args.get("name").and_then(Value::as_str).unwrap_or("world").to_string();

            let greeting = durable.step("compute-greeting", move || async move { Ok(json!(format!("hello, {name}"))) }).await;

            let _ = durable.sleep(std::time::Duration::from_millis(10)).await;

            match greeting {
                Ok(value) => {
                    durable.execution.mutate_context(|ctx| ctx.set("greeting", value)).await;
                    crate::result::Result::new(crate::result::ResultBuilder {
                        task_name: "GreetDurable".into(),
                        chain_id: uuid::Uuid::nil(),
                        index: 0,
                        state: Some(crate::result::State::Complete),
                        status: Some(crate::result::Status::Success),
                        metadata: json!({}),
                        ..crate::result::ResultBuilder::default()
                    })
                }
                Err(error) => crate::result::Result::new(crate::result::ResultBuilder {
                    task_name: "GreetDurable".into(),
                    chain_id: uuid::Uuid::nil(),
                    index: 0,
                    state: Some(crate::result::State::Interrupted),
                    status: Some(crate::result::Status::Failed),
                    reason: Some(error.to_string()),
                    metadata: json!({}),
                    ..crate::result::ResultBuilder::default()
                }),
            }
        })
    })
}

/// A [`RecoveryCoordinator`] pre-registered with every built-in durable
/// demo, for the `recover` subcommand to use as-is.
#[must_use]
pub fn recovery_coordinator() -> RecoveryCoordinator {
    let mut coordinator = RecoveryCoordinator::new();
    coordinator.register("GreetDurable", greet_durable());
    coordinator
}
