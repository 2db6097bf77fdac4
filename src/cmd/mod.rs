pub mod durable_run;
pub mod events;
pub mod recover;
pub mod run;

pub use durable_run::{DurableRunArgs, handle_durable_run};
pub use events::{EventsArgs, handle_events};
pub use recover::{RecoverArgs, handle_recover};
pub use run::{RunArgs, handle_run};
