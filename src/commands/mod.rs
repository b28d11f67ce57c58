// ABOUTME: Command module aggregator for the stagehand CLI.
// ABOUTME: Each handler returns the process exit code.

mod backups;
mod rollback;
mod run;
mod status;

pub use backups::{backups, prune};
pub use rollback::rollback;
pub use run::run;
pub use status::status;
