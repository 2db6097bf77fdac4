use clap::Parser;
use snafu::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod attribute;
mod callback;
mod chain;
mod cmd;
mod condition;
mod config;
mod context;
mod demos;
mod durable;
mod execution;
mod handle;
mod logging;
mod middleware;
mod recovery;
mod registry;
mod result;
mod signal;
mod store;
mod task;
mod workflow;

use cmd::{DurableRunArgs, EventsArgs, RecoverArgs, RunArgs, handle_durable_run, handle_events, handle_recover, handle_run};
use config::EngineConfig;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("run error: {source}"))]
    Run { source: cmd::run::Error },
    #[snafu(display("durable run error: {source}"))]
    DurableRun { source: cmd::durable_run::Error },
    #[snafu(display("recover error: {source}"))]
    Recover { source: cmd::recover::Error },
    #[snafu(display("events error: {source}"))]
    Events { source: cmd::events::Error },
}

#[derive(Parser, Debug)]
#[command(name = "workflow-engine")]
#[command(author = "Armin Graf")]
#[command(version = "1.0.0")]
#[command(about = "A durable, interactive workflow execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Run a built-in task pipeline (non-durable)
    Run(RunArgs),
    /// Start a durable workflow run and wait for it to settle
    DurableRun(DurableRunArgs),
    /// Recover and replay every active workflow in a durable store
    Recover(RecoverArgs),
    /// Print a workflow's durable event log
    Events(EventsArgs),
}

fn init_tracing(verbose: bool) {
    let filter_layer = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry().with(filter_layer).with(tracing_subscriber::fmt::layer()).init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let global_config = EngineConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Run(args) => {
            init_tracing(args.verbose || global_config.run.verbose);
            handle_run(args).await.context(RunSnafu)
        }
        Commands::DurableRun(args) => {
            init_tracing(global_config.run.verbose);
            handle_durable_run(args).await.context(DurableRunSnafu)
        }
        Commands::Recover(args) => {
            init_tracing(global_config.recover.verbose);
            handle_recover(args).await.context(RecoverSnafu)
        }
        Commands::Events(args) => {
            init_tracing(false);
            handle_events(args).await.context(EventsSnafu)
        }
    }
}
