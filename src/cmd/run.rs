use clap::Parser;
use console::style;
use snafu::prelude::*;

use crate::chain::Chain;
use crate::config::configure;
use crate::context::Context;
use crate::demos;
use crate::logging::{ConsoleLogger, Logger};
use crate::task::TaskEngine;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unknown demo '{name}'"))]
    UnknownDemo { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Built-in demo pipeline to execute
    #[arg(long, default_value = "greet")]
    pub demo: String,

    /// `name` attribute threaded into the pipeline's starting context
    #[arg(long, default_value = "world")]
    pub name: String,

    /// Enable verbose console output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Run a built-in task pipeline (the non-durable composer) and print its
/// final result.
pub async fn handle_run(args: RunArgs) -> Result<()> {
    let items = match args.demo.as_str() {
        "greet" => demos::greet_pipeline(),
        other => return UnknownDemoSnafu { name: other.to_string() }.fail(),
    };

    println!("{}\n", style("Workflow Engine").bold().cyan());

    let registries = configure(|_| {});
    let engine = TaskEngine::new(std::sync::Arc::new(registries));
    let mut context = Context::new();
    context.set("name", serde_json::json!(args.name));
    let chain = Chain::new();

    let logger = ConsoleLogger;
    let mut ctx = context;
    let mut running_chain = chain;
    for task in items {
        let (next_ctx, next_chain, result) = engine.execute(task, Context::new(), ctx, running_chain).await;
        logger.log(&result, Some(&next_ctx)).await;
        ctx = next_ctx;
        running_chain = next_chain;
        if result.failed() {
            break;
        }
    }

    if args.verbose {
        println!("\n{}", style("Final context").bold());
        println!("{}", serde_json::to_string_pretty(&ctx.to_value()).unwrap_or_default());
    }

    Ok(())
}
