use std::sync::Arc;

use clap::Parser;
use console::style;
use snafu::prelude::*;

use crate::demos;
use crate::recovery;
use crate::store::WorkflowStore;
use crate::store::redb_store::RedbStore;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("store error: {source}"))]
    Store { source: crate::store::Error },
    #[snafu(display("recovery error: {source}"))]
    Recovery { source: recovery::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct RecoverArgs {
    /// Path to the durable event/checkpoint store
    #[arg(short = 's', long, default_value = "workflow.redb")]
    pub store: String,
}

/// Enumerate every active workflow in the store, replay it against its
/// registered body, and wait for every recovered run to finish.
pub async fn handle_recover(args: RecoverArgs) -> Result<()> {
    let store: Arc<dyn WorkflowStore> = Arc::new(RedbStore::new(&args.store).context(StoreSnafu)?);
    let coordinator = demos::recovery_coordinator();

    let handles = coordinator.recover_all(store).await.context(RecoverySnafu)?;

    if handles.is_empty() {
        println!("{}", style("No active workflows to recover").dim());
        return Ok(());
    }

    println!("{} {} workflow(s)", style("Recovering").bold().cyan(), handles.len());

    for handle in handles {
        let result = handle.result().await;
        if result.good() {
            println!("  {} {} completed", style("\u{2713}").green(), handle.workflow_id());
        } else {
            println!(
                "  {} {} failed: {}",
                style("\u{2717}").red(),
                handle.workflow_id(),
                result.reason().unwrap_or("unknown")
            );
        }
    }

    Ok(())
}
