mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod utils;

use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};
use clap::Parser;
use tracing::{debug, error, info};

fn main() {
    if let Err(e) = run_app() {
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.clone())?;

    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default().into_hooks();
    eyre_hook.install().map_err(|e| CliError::Other(e.into()))?;
    std::panic::set_hook(Box::new(move |pi| {
        error!("{}", panic_hook.panic_report(pi));
    }));

    debug!("Full CLI arguments parsed: {:?}", &cli);

    let command_result = match cli.command {
        Commands::Worker => return commands::worker::run(),
        Commands::Solve(args) => {
            info!("parsolve v{} dispatching to 'solve'.", parsolve::VERSION);
            commands::solve::run(args, cli.quiet)
        }
        Commands::Compare(args) => {
            info!("parsolve v{} dispatching to 'compare'.", parsolve::VERSION);
            commands::compare::run(args, cli.quiet)
        }
        Commands::Amortize(args) => {
            info!("parsolve v{} dispatching to 'amortize'.", parsolve::VERSION);
            commands::amortize::run(args, cli.quiet)
        }
    };

    match &command_result {
        Ok(()) => info!("Command completed successfully."),
        Err(e) => error!("Command failed: {}", e),
    }
    command_result
}
