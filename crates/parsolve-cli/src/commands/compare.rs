use super::{load_config, millis, print_json, reporter};
use crate::cli::CompareArgs;
use crate::config::WorkflowOverrides;
use crate::error::{CliError, Result};
use parsolve::workflows::batch::{self, ComparisonReport};
use tracing::{error, info};

pub fn run(args: CompareArgs, quiet: bool) -> Result<()> {
    let extra = WorkflowOverrides {
        backends: args.backends.clone(),
        tolerance: args.tolerance,
        ..WorkflowOverrides::default()
    };
    let config = load_config(&args.batch, &extra)?;
    let reporter = reporter(quiet);

    info!(
        backends = config.backends.len(),
        tasks = config.request.len(),
        "Invoking the comparison workflow..."
    );
    let report = batch::compare(
        &config.request,
        &config.source,
        &config.dispatch,
        &config.backends,
        config.tolerance,
        &reporter,
    )?;

    if args.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if report.agrees() {
        Ok(())
    } else {
        for mismatch in &report.mismatches {
            error!(
                backend = %mismatch.backend,
                task = mismatch.index,
                "{}", mismatch.reason
            );
        }
        Err(CliError::Mismatch {
            count: report.mismatches.len(),
        })
    }
}

fn print_report(report: &ComparisonReport) {
    let Some(baseline) = report.runs.first() else {
        println!("No backends were run.");
        return;
    };
    println!(
        "{:<18} {:>8} {:>12} {:>9} {:>9}",
        "backend", "workers", "wall ms", "failures", "speedup"
    );
    for run in &report.runs {
        println!(
            "{:<18} {:>8} {:>12.1} {:>9} {:>8.2}x",
            run.backend.label(),
            run.workers,
            millis(run.wall_time),
            run.summary.failures,
            run.speedup_over(baseline)
        );
    }
    if report.agrees() {
        println!(
            "All backends agree within {:e} on {} task(s).",
            report.tolerance, baseline.summary.tasks
        );
    } else {
        println!(
            "{} mismatch(es) against {}:",
            report.mismatches.len(),
            baseline.backend
        );
        for mismatch in &report.mismatches {
            println!(
                "  {} task {}: {}",
                mismatch.backend, mismatch.index, mismatch.reason
            );
        }
    }
}
