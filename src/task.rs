//! The task lifecycle: attribute binding, validation, middleware,
//! callbacks, retry and rollback, producing an immutable [`Result`].

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};
use snafu::prelude::*;
use tracing::{info, warn};

use crate::attribute::{self, AttributeSchema};
use crate::callback::CallbackType;
use crate::chain::Chain;
use crate::context::Context;
use crate::logging::Logger;
use crate::middleware::{Invocation, Middleware, run_stack};
use crate::registry::GlobalRegistries;
use crate::result::{Result as TaskResult, ResultBuilder, State, Status};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// How long to wait between retry attempts.
#[derive(Clone)]
pub enum JitterPolicy {
    /// A fixed number of seconds, multiplied by the retry count.
    Constant(f64),
    /// `f(attempt) -> seconds`.
    Function(Arc<dyn Fn(u32) -> f64 + Send + Sync>),
    /// `base * attempt` seconds, randomized by up to `+/- factor` to avoid
    /// every retrying task waking up on the same tick.
    Randomized { base: f64, factor: f64 },
}

impl JitterPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let seconds = match self {
            JitterPolicy::Constant(s) => s * f64::from(attempt),
            JitterPolicy::Function(f) => f(attempt),
            JitterPolicy::Randomized { base, factor } => {
                let nominal = base * f64::from(attempt);
                if *factor > 0.0 {
                    let spread = nominal * factor.clamp(0.0, 1.0);
                    nominal + rand::thread_rng().gen_range(-spread..=spread)
                } else {
                    nominal
                }
            }
        };
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

impl Default for JitterPolicy {
    fn default() -> Self {
        JitterPolicy::Constant(0.0)
    }
}

/// A predicate over an unexpected error's message, deciding whether it is
/// worth retrying at all.
pub type RetryPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Per-task knobs governing breakpoints, retry and rollback.
#[derive(Clone)]
pub struct TaskSettings {
    /// Statuses that make `execute_strict` raise a [`Fault`] instead of
    /// returning a `Result`.
    pub breakpoints: HashSet<Status>,
    pub retries: u32,
    pub retry_jitter: JitterPolicy,
    /// Which unexpected errors are worth retrying. `None` retries every
    /// unexpected error, up to `retries` attempts.
    pub retry_on: Option<RetryPredicate>,
    /// Statuses after which `rollback` is invoked (if the task defines one).
    pub rollback_on: HashSet<Status>,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            breakpoints: HashSet::from([Status::Failed]),
            retries: 0,
            retry_jitter: JitterPolicy::default(),
            retry_on: None,
            rollback_on: HashSet::from([Status::Failed]),
        }
    }
}

/// Which back-reference an attached child `Result` should be recorded
/// under once the enclosing task's own `Result` is built.
pub enum Attach {
    /// The child Result whose breakpoint status this workflow is
    /// propagating (`Result::caused_failure`).
    Caused(Box<TaskResult>),
    /// The child Result an explicit `throw()` call re-raised
    /// (`Result::threw_failure`).
    Threw(Box<TaskResult>),
}

/// An intentional interruption raised from inside `work`.
pub enum Halt {
    Skip {
        reason: Option<String>,
        metadata: Value,
        attach: Option<Attach>,
    },
    Fail {
        reason: Option<String>,
        metadata: Value,
        attach: Option<Attach>,
    },
}

/// Everything that can come back out of `work` besides a clean success.
pub enum WorkError {
    Halt(Halt),
    /// An ordinary error. Retried up to `settings().retries` times.
    Unexpected(String),
}

pub type WorkOutcome = std::result::Result<(), WorkError>;

#[must_use]
pub fn skip(reason: impl Into<String>, metadata: Value) -> WorkError {
    WorkError::Halt(Halt::Skip {
        reason: Some(reason.into()),
        metadata,
        attach: None,
    })
}

#[must_use]
pub fn fail(reason: impl Into<String>, metadata: Value) -> WorkError {
    WorkError::Halt(Halt::Fail {
        reason: Some(reason.into()),
        metadata,
        attach: None,
    })
}

/// Propagate a child's breakpoint status as this task's own halt, merging
/// metadata and recording the child under `caused_failure`.
#[must_use]
pub fn propagate_breakpoint(child: TaskResult, metadata: Value) -> WorkError {
    halt_from_child(child, metadata, |child| Attach::Caused(Box::new(child)))
}

/// Re-raise a child's skipped/failed `Result` as this task's own halt,
/// recording the child under `threw_failure`.
#[must_use]
pub fn throw(child: TaskResult, metadata: Value) -> WorkError {
    halt_from_child(child, metadata, |child| Attach::Threw(Box::new(child)))
}

fn halt_from_child(
    child: TaskResult,
    metadata: Value,
    attach: impl FnOnce(TaskResult) -> Attach,
) -> WorkError {
    let mut merged = child.metadata().clone();
    if let (Value::Object(a), Value::Object(b)) = (&mut merged, &metadata) {
        for (k, v) in b {
            a.insert(k.clone(), v.clone());
        }
    }
    let reason = child.reason().map(str::to_string);
    let skipped = child.skipped();
    let attach = Some(attach(child));
    if skipped {
        WorkError::Halt(Halt::Skip {
            reason,
            metadata: merged,
            attach,
        })
    } else {
        WorkError::Halt(Halt::Fail {
            reason,
            metadata: merged,
            attach,
        })
    }
}

/// A unit of business logic: declared attributes, a `work` body, and the
/// optional hooks the engine calls around it.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn attributes(&self) -> AttributeSchema {
        AttributeSchema::new()
    }

    fn settings(&self) -> TaskSettings {
        TaskSettings::default()
    }

    fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        Vec::new()
    }

    fn has_rollback(&self) -> bool {
        false
    }

    async fn before_validation(&self, _ctx: &mut Context) {}
    async fn before_execution(&self, _ctx: &mut Context) {}

    /// `chain` is the shared result log this invocation is running
    /// under; a [`crate::workflow::Workflow`] passes it straight through to
    /// its children so every descendant result lands in the same chain.
    async fn work(&self, ctx: &mut Context, chain: &Chain) -> WorkOutcome;

    async fn rollback(&self, _ctx: &mut Context) {}

    async fn on_complete(&self, _result: &TaskResult) {}
    async fn on_interrupted(&self, _result: &TaskResult) {}
    async fn on_executed(&self, _result: &TaskResult) {}
    async fn on_success(&self, _result: &TaskResult) {}
    async fn on_skipped(&self, _result: &TaskResult) {}
    async fn on_failed(&self, _result: &TaskResult) {}
    async fn on_good(&self, _result: &TaskResult) {}
    async fn on_bad(&self, _result: &TaskResult) {}
}

#[derive(Debug, Snafu)]
pub enum Fault {
    #[snafu(display("task '{}' was skipped: {}", result.task_name(), result.reason().unwrap_or_default()))]
    Skip { result: TaskResult },
    #[snafu(display("task '{}' failed: {}", result.task_name(), result.reason().unwrap_or_default()))]
    Fail { result: TaskResult },
}

impl Fault {
    #[must_use]
    pub fn result(&self) -> &TaskResult {
        match self {
            Fault::Skip { result } | Fault::Fail { result } => result,
        }
    }
}

/// Runs tasks through their full lifecycle, sharing one set of global
/// registries (middleware, callbacks, coercions, validators) and an
/// optional logger across every invocation.
#[derive(Clone)]
pub struct TaskEngine {
    registries: Arc<GlobalRegistries>,
    logger: Option<Arc<dyn Logger>>,
}

impl TaskEngine {
    #[must_use]
    pub fn new(registries: Arc<GlobalRegistries>) -> Self {
        Self {
            registries,
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Execute one task. Never returns an `Err` for a business failure;
    /// the outcome is always encoded in the returned [`TaskResult`].
    pub async fn execute(
        &self,
        task: Arc<dyn Task>,
        args: Context,
        context: Context,
        chain: Chain,
    ) -> (Context, Chain, TaskResult) {
        let index = chain.next_index().await;
        let task_name = task.name().to_string();
        let settings = task.settings();
        let registries = self.registries.clone();

        let global_middleware = registries.middleware.all();
        let mut stack = global_middleware;
        stack.extend(task.middlewares());

        let core_task = task.clone();
        let core_registries = registries.clone();
        let core_settings = settings.clone();
        let core: Arc<dyn Fn(Invocation) -> BoxFuture<(Invocation, TaskResult)> + Send + Sync> =
            Arc::new(move |invocation: Invocation| {
                let task = core_task.clone();
                let registries = core_registries.clone();
                let settings = core_settings.clone();
                Box::pin(async move {
                    run_core(task, registries, settings, index, invocation).await
                })
            });

        let invocation = Invocation {
            task_name: task_name.clone(),
            context,
            args,
            chain: chain.clone(),
            options: json!({}),
        };

        let (invocation, result) = run_stack(stack, core, invocation).await;
        chain.add_result(result.clone()).await;

        if let Some(logger) = &self.logger {
            logger.log(&result, None).await;
        }
        if result.failed() {
            warn!(task = %task_name, reason = result.reason().unwrap_or_default(), "task failed");
        } else {
            info!(task = %task_name, status = ?result.status(), "task finished");
        }

        (invocation.context, invocation.chain, result)
    }

    /// Like [`TaskEngine::execute`], but raises a [`Fault`] when the
    /// result's status is one of the task's configured breakpoints.
    pub async fn execute_strict(
        &self,
        task: Arc<dyn Task>,
        args: Context,
        context: Context,
        chain: Chain,
    ) -> std::result::Result<(Context, Chain, TaskResult), Fault> {
        let breakpoints = task.settings().breakpoints.clone();
        let (context, chain, result) = self.execute(task, args, context, chain).await;
        if breakpoints.contains(&result.status()) {
            if result.skipped() {
                Err(Fault::Skip { result })
            } else {
                Err(Fault::Fail { result })
            }
        } else {
            Ok((context, chain, result))
        }
    }
}

async fn run_core(
    task: Arc<dyn Task>,
    registries: Arc<GlobalRegistries>,
    settings: TaskSettings,
    index: usize,
    invocation: Invocation,
) -> (Invocation, TaskResult) {
    let Invocation {
        task_name,
        mut context,
        args,
        chain,
        options,
    } = invocation;

    if let Some(set) = registries.callbacks.for_type(CallbackType::BeforeValidation) {
        set.run_all(None).await;
    }
    task.before_validation(&mut context).await;

    let bind_result = attribute::bind(&task.attributes(), &args, &mut context, &registries.coercions, &registries.validators);

    let settlement = match bind_result {
        Err(e) => run_unexpected_with_retry(task.as_ref(), &settings, e.to_string()).await,
        Ok(errors) if !errors.is_empty() => {
            let full_message = errors
                .iter()
                .flat_map(|(attr, messages)| messages.iter().map(move |m| format!("{attr}: {m}")))
                .collect::<Vec<_>>()
                .join(", ");
            Settlement {
                state: State::Interrupted,
                status: Status::Failed,
                reason: Some("Invalid".to_string()),
                cause: None,
                metadata: json!({ "errors": { "fullMessage": full_message, "messages": errors } }),
                retries: 0,
                attach: None,
            }
        }
        Ok(_) => {
            if let Some(set) = registries.callbacks.for_type(CallbackType::BeforeExecution) {
                set.run_all(None).await;
            }
            task.before_execution(&mut context).await;

            run_work_with_retry(task.as_ref(), &mut context, &chain, &settings).await
        }
    };

    let rolled_back = settings.rollback_on.contains(&settlement.status) && task.has_rollback();
    if rolled_back {
        task.rollback(&mut context).await;
    }

    let mut result = TaskResult::new(ResultBuilder {
        task_name,
        chain_id: chain.id(),
        index,
        state: Some(settlement.state),
        status: Some(settlement.status),
        reason: settlement.reason,
        cause: settlement.cause,
        metadata: settlement.metadata,
        retries: settlement.retries,
        rolled_back,
    });

    match settlement.attach {
        Some(Attach::Caused(child)) => result.set_caused_failure(*child),
        Some(Attach::Threw(child)) => result.set_threw_failure(*child),
        None => {}
    }

    run_lifecycle_callbacks(task.as_ref(), &registries, &mut result).await;

    let invocation = Invocation {
        task_name: result.task_name().to_string(),
        context,
        args,
        chain,
        options,
    };
    (invocation, result)
}

/// Everything needed to build the task's final [`TaskResult`], as decided
/// by validation or by [`run_work_with_retry`].
struct Settlement {
    state: State,
    status: Status,
    reason: Option<String>,
    cause: Option<String>,
    metadata: Value,
    retries: u32,
    attach: Option<Attach>,
}

async fn run_work_with_retry(task: &dyn Task, ctx: &mut Context, chain: &Chain, settings: &TaskSettings) -> Settlement {
    let mut attempt = 0;
    loop {
        match task.work(ctx, chain).await {
            Ok(()) => {
                return Settlement {
                    state: State::Complete,
                    status: Status::Success,
                    reason: None,
                    cause: None,
                    metadata: json!({}),
                    retries: attempt,
                    attach: None,
                };
            }
            Err(WorkError::Halt(Halt::Skip { reason, metadata, attach })) => {
                return Settlement {
                    state: State::Interrupted,
                    status: Status::Skipped,
                    reason,
                    cause: None,
                    metadata,
                    retries: attempt,
                    attach,
                };
            }
            Err(WorkError::Halt(Halt::Fail { reason, metadata, attach })) => {
                return Settlement {
                    state: State::Interrupted,
                    status: Status::Failed,
                    reason,
                    cause: None,
                    metadata,
                    retries: attempt,
                    attach,
                };
            }
            Err(WorkError::Unexpected(message)) => {
                let eligible = attempt < settings.retries && settings.retry_on.as_ref().is_none_or(|predicate| predicate(&message));
                if eligible {
                    tokio::time::sleep(settings.retry_jitter.delay(attempt + 1)).await;
                    attempt += 1;
                } else {
                    let reason = format!("[{}] {message}", task.name());
                    return Settlement {
                        state: State::Interrupted,
                        status: Status::Failed,
                        reason: Some(reason),
                        cause: Some(message),
                        metadata: json!({}),
                        retries: attempt,
                        attach: None,
                    };
                }
            }
        }
    }
}

/// Settle an error raised before `work` ever ran (currently: a coercion
/// miss from `attribute::bind`) the same way an unexpected error from
/// `work` itself is settled, including eligibility for `settings.retries`.
async fn run_unexpected_with_retry(task: &dyn Task, settings: &TaskSettings, message: String) -> Settlement {
    let mut attempt = 0;
    loop {
        let eligible = attempt < settings.retries && settings.retry_on.as_ref().is_none_or(|predicate| predicate(&message));
        if eligible {
            tokio::time::sleep(settings.retry_jitter.delay(attempt + 1)).await;
            attempt += 1;
        } else {
            let reason = format!("[{}] {message}", task.name());
            return Settlement {
                state: State::Interrupted,
                status: Status::Failed,
                reason: Some(reason),
                cause: Some(message),
                metadata: json!({}),
                retries: attempt,
                attach: None,
            };
        }
    }
}

async fn run_lifecycle_callbacks(
    task: &dyn Task,
    registries: &GlobalRegistries,
    result: &mut TaskResult,
) {
    let run = |t: CallbackType, result: &TaskResult| {
        let set = registries.callbacks.for_type(t);
        async move {
            if let Some(set) = set {
                set.run_all(Some(result)).await;
            }
        }
    };

    if result.complete() {
        run(CallbackType::OnComplete, result).await;
        task.on_complete(result).await;
    } else {
        run(CallbackType::OnInterrupted, result).await;
        task.on_interrupted(result).await;
    }

    run(CallbackType::OnExecuted, result).await;
    task.on_executed(result).await;

    if result.success() {
        run(CallbackType::OnSuccess, result).await;
        task.on_success(result).await;
    } else if result.skipped() {
        run(CallbackType::OnSkipped, result).await;
        task.on_skipped(result).await;
    } else {
        run(CallbackType::OnFailed, result).await;
        task.on_failed(result).await;
    }

    if result.good() {
        run(CallbackType::OnGood, result).await;
        task.on_good(result).await;
    } else {
        run(CallbackType::OnBad, result).await;
        task.on_bad(result).await;
    }
}
