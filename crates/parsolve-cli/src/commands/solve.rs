use super::{load_config, millis, print_json, reporter};
use crate::cli::SolveArgs;
use crate::config::WorkflowOverrides;
use crate::error::Result;
use parsolve::engine::collector::{BatchSummary, OutcomeKind};
use parsolve::engine::config::BackendKind;
use parsolve::engine::task::TaskOutcome;
use parsolve::workflows::batch::{self, BatchReport};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct TaskLine {
    index: usize,
    kind: OutcomeKind,
    wall_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    objective: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iterations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&TaskOutcome> for TaskLine {
    fn from(outcome: &TaskOutcome) -> Self {
        let result = outcome.solve_result();
        Self {
            index: outcome.index,
            kind: OutcomeKind::of(outcome),
            wall_ms: millis(outcome.wall_time),
            objective: result.map(|r| r.objective),
            iterations: result.map(|r| r.iterations),
            error: outcome.error().map(ToString::to_string),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct SolveOutput<'a> {
    backend: BackendKind,
    workers: usize,
    wall_ms: f64,
    summary: &'a BatchSummary,
    tasks: Vec<TaskLine>,
}

impl<'a> From<&'a BatchReport> for SolveOutput<'a> {
    fn from(report: &'a BatchReport) -> Self {
        Self {
            backend: report.backend,
            workers: report.workers,
            wall_ms: millis(report.wall_time),
            summary: &report.summary,
            tasks: report.outcomes.iter().map(TaskLine::from).collect(),
        }
    }
}

pub fn run(args: SolveArgs, quiet: bool) -> Result<()> {
    let extra = WorkflowOverrides {
        backend: args.backend,
        ..WorkflowOverrides::default()
    };
    let config = load_config(&args.batch, &extra)?;
    let reporter = reporter(quiet);

    info!(
        backend = %config.dispatch.backend,
        tasks = config.request.len(),
        "Invoking the batch workflow..."
    );
    let report = batch::run(&config.request, &config.source, &config.dispatch, &reporter)?;

    if report.summary.failures > 0 {
        warn!(
            "{} of {} task(s) failed.",
            report.summary.failures, report.summary.tasks
        );
    }

    if args.json {
        return print_json(&SolveOutput::from(&report));
    }
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &BatchReport) {
    let summary = &report.summary;
    println!(
        "Solved {} problem(s) with the {} backend ({} worker(s)) in {:.1} ms.",
        summary.tasks,
        report.backend,
        report.workers,
        millis(report.wall_time)
    );
    for (kind, count) in &summary.counts {
        println!("  {:<18} {}", kind.label(), count);
    }
    if let Some(timing) = &summary.timing {
        println!(
            "  per task: min {:.2} ms, mean {:.2} ms, max {:.2} ms",
            millis(timing.min),
            millis(timing.mean),
            millis(timing.max)
        );
    }
    for outcome in report.outcomes.iter().filter(|o| !o.is_ok()) {
        if let Some(error) = outcome.error() {
            println!("  task {}: {}", outcome.index, error);
        }
    }
}
