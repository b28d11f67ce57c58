// ABOUTME: Status command implementation.
// ABOUTME: Prints a persisted run report; the latest one when no run id is given.

use stagehand::config::Config;
use stagehand::deploy::StateStore;
use stagehand::error::{Error, Result};
use stagehand::output::Output;
use stagehand::types::RunId;

pub fn status(config: &Config, run: Option<&str>, output: &Output) -> Result<i32> {
    let store = StateStore::open(config.state_dir())?;
    let report = match run {
        Some(id) => store
            .load_report(&RunId::new(id))?
            .ok_or_else(|| Error::ReportNotFound(Some(id.to_string())))?,
        None => store.latest_report()?.ok_or(Error::ReportNotFound(None))?,
    };
    output.report(&report);
    Ok(0)
}
