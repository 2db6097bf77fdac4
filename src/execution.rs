//! The live (non-durable) interactive runtime backing a running workflow:
//! owns its `Context`, signal/query handlers and pending condition waiters,
//! and serializes every external interaction against them.
//!
//! "One workflow = one logical task" (see the design notes) is realized
//! here not as a literal single `tokio` task but as a single `tokio::sync::Mutex`
//! guarding all of a run's mutable state; every method below takes the lock
//! for the shortest span that keeps the state consistent, never holding it
//! across a handler's own `.await`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::condition::ConditionList;
use crate::context::Context;
use crate::signal::{self, HandlerRegistry, QueryDefinition, QueryHandler, SignalDefinition, SignalHandler};

struct Inner {
    context: Context,
    handlers: HandlerRegistry,
    conditions: ConditionList,
}

/// The shared state one running workflow instance exposes to its own body
/// (via `condition`/`sleep`/signal-handler registration) and to external
/// callers (via [`crate::handle::WorkflowHandle`]).
pub struct Execution {
    workflow_id: String,
    workflow_type: String,
    inner: Mutex<Inner>,
}

impl Execution {
    #[must_use]
    pub fn new(workflow_id: impl Into<String>, workflow_type: impl Into<String>, context: Context) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_type: workflow_type.into(),
            inner: Mutex::new(Inner {
                context,
                handlers: HandlerRegistry::new(),
                conditions: ConditionList::new(),
            }),
        }
    }

    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    #[must_use]
    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub async fn context(&self) -> Context {
        self.inner.lock().await.context.clone()
    }

    pub async fn set_context(&self, context: Context) {
        self.inner.lock().await.context = context;
    }

    pub async fn mutate_context(&self, f: impl FnOnce(&mut Context)) {
        f(&mut self.inner.lock().await.context);
    }

    /// Register a signal handler, immediately delivering any buffered
    /// arg-tuples in arrival order.
    pub async fn set_signal_handler(&self, def: &SignalDefinition, handler: Arc<dyn SignalHandler>) {
        let flushed = {
            let mut inner = self.inner.lock().await;
            inner.handlers.set_signal_handler(def, handler.clone())
        };
        for args in flushed {
            handler.call(args).await;
            self.evaluate_conditions().await;
        }
    }

    pub async fn set_query_handler(&self, def: &QueryDefinition, handler: Arc<dyn QueryHandler>) {
        self.inner.lock().await.handlers.set_query_handler(def, handler);
    }

    /// Deliver a signal: invoke the registered handler (buffering if none
    /// is registered yet), then re-evaluate every pending condition. Errors
    /// if the workflow has already completed.
    pub async fn signal(&self, name: &str, args: Value) -> Result<(), signal::Error> {
        let handler = {
            let mut inner = self.inner.lock().await;
            if inner.handlers.is_completed() {
                return signal::CompletedSnafu {
                    name: name.to_string(),
                    workflow: self.workflow_id.clone(),
                }
                .fail();
            }
            inner.handlers.deliver_signal(name, args.clone())
        };

        if let Some(handler) = handler {
            handler.call(args).await;
            self.evaluate_conditions().await;
        }
        Ok(())
    }

    /// Deliver a query synchronously. Serviceable after completion.
    pub async fn query(&self, name: &str, args: Value) -> Result<Value, signal::Error> {
        let handler = self.inner.lock().await.handlers.query_handler(name);
        match handler {
            Some(handler) => Ok(handler.call(args)),
            None => signal::NoHandlerSnafu {
                name: name.to_string(),
                workflow: self.workflow_id.clone(),
            }
            .fail(),
        }
    }

    async fn evaluate_conditions(&self) {
        let mut inner = self.inner.lock().await;
        let Inner { context, conditions, .. } = &mut *inner;
        conditions.evaluate(&*context);
    }

    /// Cooperative predicate-wait. Resolves `true` as soon as `predicate`
    /// holds (checked immediately, then after every signal delivery), or
    /// `false` if `timeout` elapses first.
    pub async fn condition(
        &self,
        predicate: Arc<dyn Fn(&Context) -> bool + Send + Sync>,
        timeout: Option<Duration>,
    ) -> bool {
        let outcome = {
            let mut inner = self.inner.lock().await;
            let Inner { context, conditions, .. } = &mut *inner;
            conditions.register(predicate, &*context)
        };

        match outcome {
            Ok(resolved) => resolved,
            Err((id, rx)) => match timeout {
                None => rx.await.unwrap_or(false),
                Some(duration) => {
                    tokio::select! {
                        resolved = rx => resolved.unwrap_or(false),
                        () = tokio::time::sleep(duration) => {
                            self.inner.lock().await.conditions.expire(id);
                            false
                        }
                    }
                }
            },
        }
    }

    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Mark the workflow complete: signals are rejected from here on
    /// (queries remain serviceable), and every pending condition resolves
    /// `false` so no timer keeps the process alive.
    pub async fn finalize(&self) {
        let mut inner = self.inner.lock().await;
        inner.handlers.mark_completed();
        inner.conditions.cancel_all();
    }

    #[must_use]
    pub async fn is_completed(&self) -> bool {
        self.inner.lock().await.handlers.is_completed()
    }
}
