//! Composable wrappers around a task's core execution.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::chain::Chain;
use crate::context::Context;
use crate::result::Result as TaskResult;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Everything a middleware needs to inspect or rewrite before the core
/// execution (or a later middleware) runs. Passed by value through the
/// chain so there is no shared-borrow lifetime to thread through trait
/// objects.
pub struct Invocation {
    pub task_name: String,
    pub context: Context,
    pub args: Context,
    pub chain: Chain,
    pub options: Value,
}

/// One middleware layer. Implementations decide whether, and when, to
/// call `next.run(invocation)`; skipping it short-circuits the chain with
/// a result of the middleware's own choosing.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, invocation: Invocation, next: Next) -> (Invocation, TaskResult);
}

/// The remaining portion of the middleware stack plus the task's core
/// execution, which sits at the very end of the chain.
pub struct Next {
    remaining: Vec<Arc<dyn Middleware>>,
    core: Arc<dyn Fn(Invocation) -> BoxFuture<(Invocation, TaskResult)> + Send + Sync>,
}

impl Next {
    #[must_use]
    pub fn new(
        remaining: Vec<Arc<dyn Middleware>>,
        core: Arc<dyn Fn(Invocation) -> BoxFuture<(Invocation, TaskResult)> + Send + Sync>,
    ) -> Self {
        Self { remaining, core }
    }

    pub async fn run(mut self, invocation: Invocation) -> (Invocation, TaskResult) {
        if self.remaining.is_empty() {
            (self.core)(invocation).await
        } else {
            let middleware = self.remaining.remove(0);
            let next = Next {
                remaining: self.remaining,
                core: self.core,
            };
            middleware.call(invocation, next).await
        }
    }
}

/// Runs the full stack (outermost middleware first, as declared) around
/// `core`.
pub async fn run_stack(
    stack: Vec<Arc<dyn Middleware>>,
    core: Arc<dyn Fn(Invocation) -> BoxFuture<(Invocation, TaskResult)> + Send + Sync>,
    invocation: Invocation,
) -> (Invocation, TaskResult) {
    Next::new(stack, core).run(invocation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ResultBuilder, State, Status};
    use serde_json::json;
    use std::sync::Mutex;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for Recording {
        async fn call(&self, invocation: Invocation, next: Next) -> (Invocation, TaskResult) {
            self.log.lock().unwrap().push(self.label);
            next.run(invocation).await
        }
    }

    fn core_result(chain_id: uuid::Uuid) -> TaskResult {
        TaskResult::new(ResultBuilder {
            task_name: "core".into(),
            chain_id,
            index: 0,
            state: Some(State::Complete),
            status: Some(Status::Success),
            reason: None,
            cause: None,
            metadata: json!({}),
            retries: 0,
            rolled_back: false,
        })
    }

    #[tokio::test]
    async fn outermost_middleware_runs_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new();
        let chain_id = chain.id();
        let stack: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recording { label: "outer", log: log.clone() }),
            Arc::new(Recording { label: "inner", log: log.clone() }),
        ];
        let core: Arc<dyn Fn(Invocation) -> BoxFuture<(Invocation, TaskResult)> + Send + Sync> =
            Arc::new(move |inv: Invocation| {
                let result = core_result(chain_id);
                Box::pin(async move { (inv, result) })
            });
        let invocation = Invocation {
            task_name: "t".into(),
            context: Context::new(),
            args: Context::new(),
            chain,
            options: json!({}),
        };
        let (_, result) = run_stack(stack, core, invocation).await;
        assert!(result.success());
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }
}
