use std::sync::Arc;

use clap::Parser;
use console::style;
use serde_json::json;
use snafu::prelude::*;
use uuid::Uuid;

use crate::demos;
use crate::durable;
use crate::handle::start_workflow;
use crate::store::WorkflowStore;
use crate::store::redb_store::RedbStore;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unknown demo '{name}'"))]
    UnknownDemo { name: String },
    #[snafu(display("store error: {source}"))]
    Store { source: crate::store::Error },
    #[snafu(display("durable engine error: {source}"))]
    Durable { source: durable::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct DurableRunArgs {
    /// Built-in durable demo workflow to execute
    #[arg(long, default_value = "greet")]
    pub demo: String,

    /// `name` argument passed to the workflow
    #[arg(long, default_value = "world")]
    pub name: String,

    /// Path to the durable event/checkpoint store
    #[arg(short = 's', long, default_value = "workflow.redb")]
    pub store: String,

    /// Explicit workflow id (a fresh one is generated if omitted)
    #[arg(long)]
    pub workflow_id: Option<String>,
}

/// Start a durable workflow run against a `redb`-backed store, wait for
/// it to settle, and print the outcome.
pub async fn handle_durable_run(args: DurableRunArgs) -> Result<()> {
    let body = match args.demo.as_str() {
        "greet" => demos::greet_durable(),
        other => return UnknownDemoSnafu { name: other.to_string() }.fail(),
    };

    let store: Arc<dyn WorkflowStore> = Arc::new(RedbStore::new(&args.store).context(StoreSnafu)?);
    let workflow_id = args.workflow_id.unwrap_or_else(|| Uuid::now_v7().to_string());

    println!("{} {}", style("Starting durable workflow").bold().cyan(), style(&workflow_id).dim());

    let handle = start_workflow(workflow_id.clone(), "GreetDurable", store, body, json!({"name": args.name}))
        .await
        .context(DurableSnafu)?;

    let result = handle.result().await;
    if result.good() {
        println!("{} {}", style("\u{2713}").green().bold(), style("workflow completed").green());
    } else {
        println!(
            "{} {}",
            style("\u{2717}").red().bold(),
            style(format!("workflow failed: {}", result.reason().unwrap_or("unknown"))).red()
        );
    }
    println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());

    Ok(())
}
