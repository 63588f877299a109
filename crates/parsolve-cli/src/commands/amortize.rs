use super::{load_config, millis, print_json, reporter};
use crate::cli::AmortizeArgs;
use crate::config::WorkflowOverrides;
use crate::error::Result;
use parsolve::workflows::batch::{self, AmortizedReport};
use tracing::{info, warn};

pub fn run(args: AmortizeArgs, quiet: bool) -> Result<()> {
    let extra = WorkflowOverrides {
        backend: args.backend,
        repeats: args.repeats,
        ..WorkflowOverrides::default()
    };
    let config = load_config(&args.batch, &extra)?;
    if !config.dispatch.backend.shares_memory() {
        warn!(
            backend = %config.dispatch.backend,
            "Workspaces cannot cross a process boundary; this backend will refuse the batch."
        );
    }
    let reporter = reporter(quiet);

    info!(
        backend = %config.dispatch.backend,
        tasks = config.request.len(),
        repeats = config.repeats,
        "Invoking the amortized workflow..."
    );
    let report = batch::amortize(
        &config.request,
        &config.source,
        &config.dispatch,
        config.repeats,
        &reporter,
    )?;

    if args.json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &AmortizedReport) {
    let built = report.construction.tasks - report.construction.failures;
    println!(
        "Constructed {}/{} workspace(s) with the {} backend in {:.1} ms.",
        built,
        report.construction.tasks,
        report.backend,
        millis(report.construct_wall_time)
    );
    println!(
        "Ran {} solve(s) over {} round(s) in {:.1} ms ({} failure(s)).",
        report.solves.tasks,
        report.repeats,
        millis(report.solve_wall_time),
        report.solves.failures
    );
    if let Some(timing) = &report.solves.timing {
        println!(
            "  per solve: min {:.2} ms, mean {:.2} ms, max {:.2} ms",
            millis(timing.min),
            millis(timing.mean),
            millis(timing.max)
        );
    }
    for (kind, count) in &report.solves.counts {
        println!("  {:<18} {}", kind.label(), count);
    }
}
