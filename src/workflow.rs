//! Static composition of tasks into sequential and parallel pipelines.

use std::collections::HashSet;
use std::sync::Arc;

use async_recursion::async_recursion;
use async_trait::async_trait;

use crate::attribute::AttributeSchema;
use crate::chain::Chain;
use crate::context::Context;
use crate::middleware::Middleware;
use crate::result::{Result as TaskResult, Status};
use crate::task::{self, Fault, Task, TaskEngine, TaskSettings, WorkOutcome};

/// How a [`Group`]'s children are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    Parallel,
}

/// One child of a workflow's task list: either a single task entry or a
/// nested group with its own strategy.
pub enum PipelineItem {
    Entry(TaskEntry),
    Group(Group),
}

/// A single task, gated by optional `if`/`unless` predicates and an
/// optional override of the workflow's default breakpoints.
pub struct TaskEntry {
    pub task: Arc<dyn Task>,
    pub if_guard: Option<Arc<dyn Fn(&Context) -> bool + Send + Sync>>,
    pub unless_guard: Option<Arc<dyn Fn(&Context) -> bool + Send + Sync>>,
    pub breakpoints: Option<HashSet<Status>>,
}

impl TaskEntry {
    #[must_use]
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self {
            task,
            if_guard: None,
            unless_guard: None,
            breakpoints: None,
        }
    }

    #[must_use]
    pub fn with_if(mut self, guard: Arc<dyn Fn(&Context) -> bool + Send + Sync>) -> Self {
        self.if_guard = Some(guard);
        self
    }

    #[must_use]
    pub fn with_unless(mut self, guard: Arc<dyn Fn(&Context) -> bool + Send + Sync>) -> Self {
        self.unless_guard = Some(guard);
        self
    }

    #[must_use]
    pub fn with_breakpoints(mut self, breakpoints: HashSet<Status>) -> Self {
        self.breakpoints = Some(breakpoints);
        self
    }

    fn gated_on(&self, ctx: &Context) -> bool {
        let if_ok = self.if_guard.as_ref().is_none_or(|g| g(ctx));
        let unless_ok = self.unless_guard.as_ref().is_none_or(|g| !g(ctx));
        if_ok && unless_ok
    }
}

impl From<Arc<dyn Task>> for TaskEntry {
    fn from(task: Arc<dyn Task>) -> Self {
        TaskEntry::new(task)
    }
}

/// A nested list of items run together under one [`Strategy`].
pub struct Group {
    pub items: Vec<PipelineItem>,
    pub strategy: Strategy,
    pub if_guard: Option<Arc<dyn Fn(&Context) -> bool + Send + Sync>>,
    pub unless_guard: Option<Arc<dyn Fn(&Context) -> bool + Send + Sync>>,
    pub breakpoints: Option<HashSet<Status>>,
}

impl Group {
    #[must_use]
    pub fn sequential(items: Vec<PipelineItem>) -> Self {
        Self {
            items,
            strategy: Strategy::Sequential,
            if_guard: None,
            unless_guard: None,
            breakpoints: None,
        }
    }

    #[must_use]
    pub fn parallel(items: Vec<PipelineItem>) -> Self {
        Self {
            items,
            strategy: Strategy::Parallel,
            if_guard: None,
            unless_guard: None,
            breakpoints: None,
        }
    }

    #[must_use]
    pub fn with_if(mut self, guard: Arc<dyn Fn(&Context) -> bool + Send + Sync>) -> Self {
        self.if_guard = Some(guard);
        self
    }

    #[must_use]
    pub fn with_unless(mut self, guard: Arc<dyn Fn(&Context) -> bool + Send + Sync>) -> Self {
        self.unless_guard = Some(guard);
        self
    }

    #[must_use]
    pub fn with_breakpoints(mut self, breakpoints: HashSet<Status>) -> Self {
        self.breakpoints = Some(breakpoints);
        self
    }

    fn gated_on(&self, ctx: &Context) -> bool {
        let if_ok = self.if_guard.as_ref().is_none_or(|g| g(ctx));
        let unless_ok = self.unless_guard.as_ref().is_none_or(|g| !g(ctx));
        if_ok && unless_ok
    }
}

/// Runs a static list of [`PipelineItem`]s against a shared `Context` and
/// `Chain`, honoring each item's gating, strategy and breakpoints.
///
/// This is what a [`Workflow`] task's `work` delegates to; it is also usable
/// directly by anything that wants to compose tasks without wrapping them
/// in a `Workflow`.
#[async_recursion]
pub async fn run_tasks(
    engine: &TaskEngine,
    items: &[PipelineItem],
    default_breakpoints: &HashSet<Status>,
    mut context: Context,
    mut chain: Chain,
) -> (Context, Chain, Option<TaskResult>) {
    for item in items {
        let (next_context, next_chain, outcome) =
            run_item(engine, item, default_breakpoints, context, chain).await;
        context = next_context;
        chain = next_chain;
        if let Some(breaking) = outcome {
            return (context, chain, Some(breaking));
        }
    }
    (context, chain, None)
}

#[async_recursion]
async fn run_item(
    engine: &TaskEngine,
    item: &PipelineItem,
    default_breakpoints: &HashSet<Status>,
    context: Context,
    chain: Chain,
) -> (Context, Chain, Option<TaskResult>) {
    match item {
        PipelineItem::Entry(entry) => run_entry(engine, entry, default_breakpoints, context, chain).await,
        PipelineItem::Group(group) => run_group(engine, group, default_breakpoints, context, chain).await,
    }
}

async fn run_entry(
    engine: &TaskEngine,
    entry: &TaskEntry,
    default_breakpoints: &HashSet<Status>,
    context: Context,
    chain: Chain,
) -> (Context, Chain, Option<TaskResult>) {
    if !entry.gated_on(&context) {
        return (context, chain, None);
    }

    let breakpoints = entry.breakpoints.clone().unwrap_or_else(|| default_breakpoints.clone());
    let (context, chain, result) = engine
        .execute(entry.task.clone(), Context::new(), context, chain)
        .await;

    if breakpoints.contains(&result.status()) {
        (context, chain, Some(result))
    } else {
        (context, chain, None)
    }
}

#[async_recursion]
async fn run_group(
    engine: &TaskEngine,
    group: &Group,
    default_breakpoints: &HashSet<Status>,
    context: Context,
    chain: Chain,
) -> (Context, Chain, Option<TaskResult>) {
    if !group.gated_on(&context) {
        return (context, chain, None);
    }

    let breakpoints = group.breakpoints.clone().unwrap_or_else(|| default_breakpoints.clone());

    match group.strategy {
        Strategy::Sequential => run_tasks(engine, &group.items, &breakpoints, context, chain).await,
        Strategy::Parallel => run_parallel(engine, &group.items, &breakpoints, context, chain).await,
    }
}

/// Snapshot `context`, clone it once per branch, run every branch
/// concurrently against the shared `chain`, then report the first
/// breakpoint-triggering result (in list order) without merging any
/// branch's context mutations back into the parent.
async fn run_parallel(
    engine: &TaskEngine,
    items: &[PipelineItem],
    breakpoints: &HashSet<Status>,
    context: Context,
    chain: Chain,
) -> (Context, Chain, Option<TaskResult>) {
    let snapshot = context.clone();

    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        let engine = engine.clone();
        let branch_context = snapshot.deep_clone();
        let branch_chain = chain.clone();
        let breakpoints = breakpoints.clone();
        let item_view = clone_item_for_branch(item);
        handles.push(tokio::spawn(async move {
            run_item(&engine, &item_view, &breakpoints, branch_context, branch_chain).await
        }));
    }

    let mut first_breaking = None;
    for handle in handles {
        let (_, _, outcome) = handle.await.expect("workflow branch task panicked");
        if let Some(result) = outcome {
            if first_breaking.is_none() {
                first_breaking = Some(result);
            }
        }
    }

    (context, chain, first_breaking)
}

/// A `PipelineItem` holds trait objects and closures rather than deriving
/// `Clone`; a parallel branch only needs its own view of the item for the
/// spawned task's lifetime, so this rebuilds one sharing the same `Arc`s.
fn clone_item_for_branch(item: &PipelineItem) -> PipelineItem {
    match item {
        PipelineItem::Entry(entry) => PipelineItem::Entry(TaskEntry {
            task: entry.task.clone(),
            if_guard: entry.if_guard.clone(),
            unless_guard: entry.unless_guard.clone(),
            breakpoints: entry.breakpoints.clone(),
        }),
        PipelineItem::Group(group) => PipelineItem::Group(Group {
            items: group.items.iter().map(clone_item_for_branch).collect(),
            strategy: group.strategy,
            if_guard: group.if_guard.clone(),
            unless_guard: group.unless_guard.clone(),
            breakpoints: group.breakpoints.clone(),
        }),
    }
}

/// A [`Task`] whose `work` walks a static list of child tasks/groups,
/// turning the first child `Result` that hits a breakpoint into its own
/// skip/fail via [`task::propagate_breakpoint`].
pub struct Workflow {
    name: String,
    engine: TaskEngine,
    items: Vec<PipelineItem>,
    attributes: AttributeSchema,
    settings: TaskSettings,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Workflow {
    #[must_use]
    pub fn new(name: impl Into<String>, engine: TaskEngine, items: Vec<PipelineItem>) -> Self {
        Self {
            name: name.into(),
            engine,
            items,
            attributes: AttributeSchema::new(),
            settings: TaskSettings::default(),
            middlewares: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeSchema) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: TaskSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_middlewares(mut self, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        self.middlewares = middlewares;
        self
    }
}

#[async_trait]
impl Task for Workflow {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> AttributeSchema {
        self.attributes.clone()
    }

    fn settings(&self) -> TaskSettings {
        self.settings.clone()
    }

    fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares.clone()
    }

    async fn work(&self, ctx: &mut Context, chain: &Chain) -> WorkOutcome {
        let breakpoints = self.settings.breakpoints.clone();
        let (resulting_context, _chain, breaking) =
            run_tasks(&self.engine, &self.items, &breakpoints, ctx.clone(), chain.clone()).await;
        *ctx = resulting_context;

        match breaking {
            None => Ok(()),
            Some(child) => Err(task::propagate_breakpoint(child, serde_json::json!({}))),
        }
    }
}

/// Run `items` directly through `engine`, raising a [`Fault`] if any
/// breakpoint-triggering child `Result` surfaces. A thin convenience over
/// [`run_tasks`] for callers that don't want to wrap the pipeline in a
/// [`Workflow`] task.
pub async fn run_strict(
    engine: &TaskEngine,
    items: &[PipelineItem],
    default_breakpoints: &HashSet<Status>,
    context: Context,
    chain: Chain,
) -> std::result::Result<(Context, Chain), Fault> {
    let (context, chain, breaking) = run_tasks(engine, items, default_breakpoints, context, chain).await;
    match breaking {
        None => Ok((context, chain)),
        Some(result) if result.skipped() => Err(Fault::Skip { result }),
        Some(result) => Err(Fault::Fail { result }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::GlobalRegistries;
    use crate::task::fail;
    use serde_json::json;

    struct SetStep(&'static str, i64);

    #[async_trait]
    impl Task for SetStep {
        fn name(&self) -> &str {
            self.0
        }

        async fn work(&self, ctx: &mut Context, _chain: &Chain) -> WorkOutcome {
            ctx.set(self.0, json!(self.1));
            Ok(())
        }
    }

    struct FailStep;

    #[async_trait]
    impl Task for FailStep {
        fn name(&self) -> &str {
            "FailStep"
        }

        async fn work(&self, _ctx: &mut Context, _chain: &Chain) -> WorkOutcome {
            Err(fail("boom", json!({})))
        }
    }

    fn engine() -> TaskEngine {
        TaskEngine::new(Arc::new(GlobalRegistries::new()))
    }

    #[tokio::test]
    async fn sequential_items_run_in_order_and_share_context() {
        let items = vec![
            PipelineItem::Entry(TaskEntry::new(Arc::new(SetStep("a", 1)))),
            PipelineItem::Entry(TaskEntry::new(Arc::new(SetStep("b", 2)))),
        ];
        let breakpoints = HashSet::from([Status::Failed]);
        let (ctx, _chain, breaking) =
            run_tasks(&engine(), &items, &breakpoints, Context::new(), Chain::new()).await;
        assert!(breaking.is_none());
        assert_eq!(ctx.get("a"), Some(&json!(1)));
        assert_eq!(ctx.get("b"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn sequential_failure_stops_the_pipeline_and_reports_the_child() {
        let items = vec![
            PipelineItem::Entry(TaskEntry::new(Arc::new(FailStep))),
            PipelineItem::Entry(TaskEntry::new(Arc::new(SetStep("never", 1)))),
        ];
        let breakpoints = HashSet::from([Status::Failed]);
        let (ctx, _chain, breaking) =
            run_tasks(&engine(), &items, &breakpoints, Context::new(), Chain::new()).await;
        let breaking = breaking.expect("expected a breakpoint result");
        assert_eq!(breaking.reason(), Some("boom"));
        assert!(!ctx.has("never"));
    }

    #[tokio::test]
    async fn guarded_entry_is_skipped_when_if_is_false() {
        let entry = TaskEntry::new(Arc::new(SetStep("gated", 1)))
            .with_if(Arc::new(|ctx: &Context| ctx.has("go")));
        let items = vec![PipelineItem::Entry(entry)];
        let breakpoints = HashSet::from([Status::Failed]);
        let (ctx, _chain, breaking) =
            run_tasks(&engine(), &items, &breakpoints, Context::new(), Chain::new()).await;
        assert!(breaking.is_none());
        assert!(!ctx.has("gated"));
    }

    #[tokio::test]
    async fn parallel_group_does_not_leak_branch_mutations_into_parent() {
        let group = Group::parallel(vec![
            PipelineItem::Entry(TaskEntry::new(Arc::new(SetStep("b", 1)))),
            PipelineItem::Entry(TaskEntry::new(Arc::new(SetStep("c", 2)))),
        ]);
        let items = vec![
            PipelineItem::Entry(TaskEntry::new(Arc::new(SetStep("step", 1)))),
            PipelineItem::Group(group),
        ];
        let breakpoints = HashSet::from([Status::Failed]);
        let (ctx, _chain, breaking) =
            run_tasks(&engine(), &items, &breakpoints, Context::new(), Chain::new()).await;
        assert!(breaking.is_none());
        assert_eq!(ctx.get("step"), Some(&json!(1)));
        assert!(!ctx.has("b"));
        assert!(!ctx.has("c"));
    }

    #[tokio::test]
    async fn parallel_breakpoint_is_reported_from_the_failing_branch() {
        let group = Group::parallel(vec![
            PipelineItem::Entry(TaskEntry::new(Arc::new(FailStep))),
            PipelineItem::Entry(TaskEntry::new(Arc::new(SetStep("sibling", 1)))),
        ]);
        let items = vec![PipelineItem::Group(group)];
        let breakpoints = HashSet::from([Status::Failed]);
        let (_ctx, _chain, breaking) =
            run_tasks(&engine(), &items, &breakpoints, Context::new(), Chain::new()).await;
        let breaking = breaking.expect("expected a breakpoint result");
        assert_eq!(breaking.reason(), Some("boom"));
    }

    #[tokio::test]
    async fn workflow_task_propagates_the_breaking_childs_reason() {
        let items = vec![PipelineItem::Entry(TaskEntry::new(Arc::new(FailStep)))];
        let workflow = Workflow::new("Pipeline", engine(), items);
        let outer_engine = engine();
        let (_ctx, _chain, result) = outer_engine
            .execute(Arc::new(workflow), Context::new(), Context::new(), Chain::new())
            .await;
        assert!(result.failed());
        assert_eq!(result.reason(), Some("boom"));
        assert_eq!(result.caused_failure().unwrap().reason(), Some("boom"));
    }

    #[tokio::test]
    async fn workflow_children_are_recorded_in_the_callers_chain() {
        let items = vec![
            PipelineItem::Entry(TaskEntry::new(Arc::new(SetStep("a", 1)))),
            PipelineItem::Entry(TaskEntry::new(Arc::new(SetStep("b", 2)))),
        ];
        let workflow = Workflow::new("Pipeline", engine(), items);
        let outer_chain = Chain::new();
        let (_ctx, chain, result) = engine()
            .execute(Arc::new(workflow), Context::new(), Context::new(), outer_chain)
            .await;
        assert!(result.good());
        assert_eq!(chain.size().await, 3);
    }
}
