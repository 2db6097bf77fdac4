//! Lifecycle callback definitions fired around a task's execution.

use async_trait::async_trait;

use crate::result::Result;

/// The eight lifecycle hooks a task or the engine's global registry can
/// attach a callback to (state/status/outcome categories), run in this
/// order after a task settles. `BeforeValidation`/`BeforeExecution` run
/// earlier, ahead of validation and `work` respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackType {
    BeforeValidation,
    BeforeExecution,
    OnComplete,
    OnInterrupted,
    OnExecuted,
    OnSuccess,
    OnSkipped,
    OnFailed,
    OnGood,
    OnBad,
}

/// A callback invoked with the settled [`Result`] (or, for the two
/// `Before*` hooks, `None`, since no `Result` exists yet).
#[async_trait]
pub trait Callback: Send + Sync {
    async fn call(&self, result: Option<&Result>);
}

#[async_trait]
impl<F> Callback for F
where
    F: Fn(Option<&Result>) + Send + Sync,
{
    async fn call(&self, result: Option<&Result>) {
        self(result);
    }
}

/// A named, ordered group of callbacks for a single [`CallbackType`].
#[derive(Default)]
pub struct CallbackSet {
    entries: Vec<std::sync::Arc<dyn Callback>>,
}

impl CallbackSet {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, callback: std::sync::Arc<dyn Callback>) {
        self.entries.push(callback);
    }

    pub async fn run_all(&self, result: Option<&Result>) {
        for callback in &self.entries {
            callback.call(result).await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn callbacks_run_in_declaration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = CallbackSet::new();
        for i in 0..3 {
            let log = log.clone();
            set.push(Arc::new(move |_: Option<&Result>| log.lock().unwrap().push(i)));
        }
        set.run_all(None).await;
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }
}
