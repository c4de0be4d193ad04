//! Command implementations for the CLI.

mod push;
mod query;
mod record;
mod runs;
mod scan;

pub use push::cmd_push;
pub use query::cmd_query;
pub use record::cmd_record;
pub use runs::{cmd_delete, cmd_runs};
pub use scan::cmd_scan;
