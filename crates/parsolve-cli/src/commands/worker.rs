use crate::error::Result;
use parsolve::engine::worker;
use std::io;
use tracing::debug;

/// Serves one isolated-process request. Stdout carries the reply and nothing else.
pub fn run() -> Result<()> {
    debug!(pid = std::process::id(), "Worker process started.");
    worker::serve(io::stdin().lock(), io::stdout().lock())?;
    Ok(())
}
