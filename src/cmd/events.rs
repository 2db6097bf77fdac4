use std::sync::Arc;

use clap::Parser;
use console::style;
use snafu::prelude::*;

use crate::store::WorkflowStore;
use crate::store::redb_store::RedbStore;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("store error: {source}"))]
    Store { source: crate::store::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct EventsArgs {
    /// Path to the durable event/checkpoint store
    #[arg(short = 's', long, default_value = "workflow.redb")]
    pub store: String,

    /// Workflow id to inspect
    pub workflow_id: String,

    /// Only print events after this sequence number
    #[arg(long)]
    pub after: Option<u64>,
}

/// Print a workflow's durable event log, one JSON object per line.
pub async fn handle_events(args: EventsArgs) -> Result<()> {
    let store: Arc<dyn WorkflowStore> = Arc::new(RedbStore::new(&args.store).context(StoreSnafu)?);

    let events = match args.after {
        Some(after) => store.get_events_after(&args.workflow_id, after).await,
        None => store.get_events(&args.workflow_id).await,
    }
    .context(StoreSnafu)?;

    if events.is_empty() {
        println!("{}", style("No events found").dim());
        return Ok(());
    }

    for event in events {
        println!("{}", serde_json::to_string(&event).unwrap_or_default());
    }

    Ok(())
}
