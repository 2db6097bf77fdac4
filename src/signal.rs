//! Signal and query definitions, and the per-workflow handler registry.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use snafu::prelude::*;

/// A signal definition: fire-and-forget, identified by `name`. Two
/// definitions with the same name are interchangeable — identity is by
/// name, not by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalDefinition {
    name: String,
}

impl SignalDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A query definition: synchronous read, identified by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryDefinition {
    name: String,
}

impl QueryDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A signal handler, invoked with the signal's argument tuple (as a JSON
/// array). May run asynchronously.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn call(&self, args: Value);
}

#[async_trait]
impl<F, Fut> SignalHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn call(&self, args: Value) {
        self(args).await;
    }
}

/// A query handler, invoked synchronously with the query's argument tuple.
pub trait QueryHandler: Send + Sync {
    fn call(&self, args: Value) -> Value;
}

impl<F> QueryHandler for F
where
    F: Fn(Value) -> Value + Send + Sync,
{
    fn call(&self, args: Value) -> Value {
        self(args)
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no handler registered for query '{name}' in workflow '{workflow}'"))]
    NoHandler { name: String, workflow: String },
    #[snafu(display("workflow '{workflow}' has already completed; signal '{name}' was rejected"))]
    Completed { name: String, workflow: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-workflow signal/query handlers, plus the buffer of signals that
/// arrived before their handler was registered.
#[derive(Default)]
pub struct HandlerRegistry {
    signal_handlers: IndexMap<String, Arc<dyn SignalHandler>>,
    query_handlers: IndexMap<String, Arc<dyn QueryHandler>>,
    buffer: IndexMap<String, VecDeque<Value>>,
    completed: bool,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the workflow complete: signals are rejected from here on,
    /// queries remain serviceable.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Register a signal handler, flushing any buffered arg tuples (in
    /// arrival order) as if freshly delivered.
    pub fn set_signal_handler(&mut self, def: &SignalDefinition, handler: Arc<dyn SignalHandler>) -> Vec<Value> {
        self.signal_handlers.insert(def.name().to_string(), handler);
        self.buffer
            .shift_remove(def.name())
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn set_query_handler(&mut self, def: &QueryDefinition, handler: Arc<dyn QueryHandler>) {
        self.query_handlers.insert(def.name().to_string(), handler);
    }

    /// Deliver a signal. Returns `Some(handler)` if one is registered (the
    /// caller is responsible for invoking it and then re-evaluating
    /// conditions); buffers the args and returns `None` otherwise.
    pub fn deliver_signal(&mut self, name: &str, args: Value) -> Option<Arc<dyn SignalHandler>> {
        if let Some(handler) = self.signal_handlers.get(name) {
            Some(handler.clone())
        } else {
            self.buffer.entry(name.to_string()).or_default().push_back(args);
            None
        }
    }

    pub fn query_handler(&self, name: &str) -> Option<Arc<dyn QueryHandler>> {
        self.query_handlers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc as StdArc, Mutex};

    #[test]
    fn buffered_signal_is_flushed_on_handler_registration() {
        let mut registry = HandlerRegistry::new();
        let def = SignalDefinition::new("approve");
        assert!(registry.deliver_signal("approve", json!(["alice"])).is_none());
        assert!(registry.deliver_signal("approve", json!(["bob"])).is_none());

        let received: StdArc<Mutex<Vec<Value>>> = StdArc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let flushed = registry.set_signal_handler(
            &def,
            StdArc::new(move |args: Value| {
                log.lock().unwrap().push(args);
                async {}
            }),
        );
        assert_eq!(flushed, vec![json!(["alice"]), json!(["bob"])]);
    }

    #[test]
    fn query_without_a_handler_is_reported_by_the_caller() {
        let registry = HandlerRegistry::new();
        assert!(registry.query_handler("status").is_none());
    }

    #[test]
    fn query_handler_runs_synchronously() {
        let mut registry = HandlerRegistry::new();
        let def = QueryDefinition::new("status");
        registry.set_query_handler(&def, StdArc::new(|_args: Value| json!("ok")));
        let handler = registry.query_handler("status").unwrap();
        assert_eq!(handler.call(json!([])), json!("ok"));
    }
}
