pub mod amortize;
pub mod compare;
pub mod solve;
pub mod worker;

use crate::cli::BatchArgs;
use crate::config::{PartialRunConfig, RunConfig, WorkflowOverrides};
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use parsolve::engine::progress::ProgressReporter;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};

fn load_config(args: &BatchArgs, extra: &WorkflowOverrides) -> Result<RunConfig> {
    let partial = PartialRunConfig::load(args.config.as_deref())?;
    info!("Merging configuration from file and CLI arguments...");
    let config = partial.merge_with_cli(args, extra)?;
    debug!(?config, "Resolved run configuration.");
    Ok(config)
}

/// Progress output for a batch command. The workflows gate it themselves when the
/// dispatch is verbose.
fn reporter(quiet: bool) -> ProgressReporter<'static> {
    let handler = if quiet {
        CliProgressHandler::hidden()
    } else {
        CliProgressHandler::new()
    };
    ProgressReporter::with_callback(handler.get_callback())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1e3
}
