use crate::core::generate::ProblemSource;
use crate::core::problem::ProblemSpec;
use crate::core::solver::result::SolveResult;
use crate::core::solver::settings::{SolveOverrides, SolverSettings};
use crate::engine::backend;
use crate::engine::collector::{BatchSummary, OutcomeKind, ResultCollector};
use crate::engine::config::{BackendKind, DispatchConfig};
use crate::engine::dispatcher::Dispatcher;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::task::{TaskOutcome, TaskOutput, TaskPayload};
use crate::engine::workspace::Workspace;
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// A batch of generated problems: one instance of `size` rows per seed.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub size: usize,
    pub seeds: Range<u64>,
    pub settings: SolverSettings,
    pub overrides: SolveOverrides,
}

impl BatchRequest {
    pub fn new(size: usize, count: usize, first_seed: u64) -> Self {
        Self {
            size,
            seeds: first_seed..first_seed.saturating_add(count as u64),
            settings: SolverSettings::default(),
            overrides: SolveOverrides::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.seeds.end.saturating_sub(self.seeds.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn generate(&self, source: &dyn ProblemSource) -> Vec<Arc<ProblemSpec>> {
        self.seeds
            .clone()
            .map(|seed| Arc::new(source.generate(self.size, seed)))
            .collect()
    }

    /// Solver settings for a dispatch. A verbose dispatch turns on solver messages even
    /// when the request itself is quiet.
    pub fn settings_for(&self, config: &DispatchConfig) -> SolverSettings {
        SolverSettings {
            verbose: self.settings.verbose || config.verbose,
            ..self.settings
        }
    }

    fn solve_payloads(&self, specs: &[Arc<ProblemSpec>], config: &DispatchConfig) -> Vec<TaskPayload> {
        let settings = self.settings_for(config);
        specs
            .iter()
            .map(|spec| TaskPayload::Solve {
                spec: Arc::clone(spec),
                settings,
                overrides: self.overrides,
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub backend: BackendKind,
    pub workers: usize,
    pub wall_time: Duration,
    pub outcomes: Vec<TaskOutcome>,
    pub summary: BatchSummary,
}

impl BatchReport {
    /// Solve results in task order; `None` where the task failed.
    pub fn results(&self) -> impl Iterator<Item = Option<&SolveResult>> + '_ {
        self.outcomes.iter().map(TaskOutcome::solve_result)
    }
}

#[instrument(skip_all, name = "batch_workflow", fields(backend = %config.backend, tasks = request.len()))]
pub fn run(
    request: &BatchRequest,
    source: &dyn ProblemSource,
    config: &DispatchConfig,
    reporter: &ProgressReporter,
) -> Result<BatchReport, EngineError> {
    let reporter = reporter.scoped(config.verbose);
    let specs = generate_specs(request, source, &reporter);
    run_specs(request, &specs, config, &reporter)
}

fn generate_specs(
    request: &BatchRequest,
    source: &dyn ProblemSource,
    reporter: &ProgressReporter,
) -> Vec<Arc<ProblemSpec>> {
    reporter.report(Progress::PhaseStart { name: "Generation" });
    info!(
        "Generating {} problem(s) with {} row(s) each.",
        request.len(),
        request.size
    );
    let specs = request.generate(source);
    reporter.report(Progress::PhaseFinish);
    specs
}

fn run_specs(
    request: &BatchRequest,
    specs: &[Arc<ProblemSpec>],
    config: &DispatchConfig,
    reporter: &ProgressReporter,
) -> Result<BatchReport, EngineError> {
    let backend = backend::from_config(config)?;
    let started = Instant::now();
    let outcomes = Dispatcher::new(reporter).map(
        request.solve_payloads(specs, config),
        backend.as_ref(),
        config.worker_count,
        config.on_error,
    )?;
    let wall_time = started.elapsed();

    let summary = ResultCollector::from_iter(&outcomes).summary();
    info!(
        backend = %config.backend,
        wall_ms = wall_time.as_secs_f64() * 1e3,
        failures = summary.failures,
        "Batch finished."
    );
    Ok(BatchReport {
        backend: config.backend,
        workers: config.worker_count.get(),
        wall_time,
        outcomes,
        summary,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AmortizedReport {
    pub backend: BackendKind,
    pub repeats: usize,
    pub construct_wall_time: Duration,
    pub solve_wall_time: Duration,
    pub construction: BatchSummary,
    pub solves: BatchSummary,
    /// Result of the final solve for each problem, in task order.
    #[serde(skip)]
    pub results: Vec<Option<SolveResult>>,
}

/// Builds one workspace per problem through the configured backend, then solves every
/// workspace `repeats` times, reusing its factorization.
///
/// Workspaces cannot leave the process, so the isolated-process backend rejects this flow
/// with a transport error before any work starts.
#[instrument(skip_all, name = "amortize_workflow", fields(backend = %config.backend, tasks = request.len(), repeats = repeats))]
pub fn amortize(
    request: &BatchRequest,
    source: &dyn ProblemSource,
    config: &DispatchConfig,
    repeats: usize,
    reporter: &ProgressReporter,
) -> Result<AmortizedReport, EngineError> {
    let reporter = reporter.scoped(config.verbose);
    let specs = generate_specs(request, source, &reporter);
    let backend = backend::from_config(config)?;
    let dispatcher = Dispatcher::new(&reporter);
    let settings = request.settings_for(config);

    let construct_started = Instant::now();
    let built = dispatcher.map(
        specs
            .iter()
            .map(|spec| TaskPayload::setup(Arc::clone(spec), settings))
            .collect(),
        backend.as_ref(),
        config.worker_count,
        config.on_error,
    )?;
    let construct_wall_time = construct_started.elapsed();
    let construction = ResultCollector::from_iter(&built).summary();

    let mut workspaces: Vec<Option<Box<Workspace>>> = built
        .into_iter()
        .map(|outcome| outcome.result.ok().and_then(TaskOutput::into_workspace))
        .collect();
    let ready = workspaces.iter().filter(|w| w.is_some()).count();
    info!(
        "Constructed {}/{} workspace(s) in {:.1} ms.",
        ready,
        workspaces.len(),
        construct_wall_time.as_secs_f64() * 1e3
    );

    let mut results: Vec<Option<SolveResult>> = vec![None; workspaces.len()];
    let mut solves = ResultCollector::new();
    let solve_started = Instant::now();
    for round in 0..repeats {
        let positions: Vec<usize> = (0..workspaces.len())
            .filter(|&i| workspaces[i].is_some())
            .collect();
        if positions.is_empty() {
            break;
        }
        let payloads = positions
            .iter()
            .filter_map(|&i| workspaces[i].take())
            .map(|ws| TaskPayload::resolve(ws, request.overrides))
            .collect();

        let outcomes = dispatcher.map(
            payloads,
            backend.as_ref(),
            config.worker_count,
            config.on_error,
        )?;
        solves.extend(&outcomes);

        for (outcome, &position) in outcomes.into_iter().zip(&positions) {
            match outcome.result {
                Ok(TaskOutput::Resolved { workspace, result }) => {
                    workspaces[position] = Some(workspace);
                    results[position] = Some(result);
                }
                Ok(_) => {
                    return Err(EngineError::Internal(format!(
                        "resolve task for problem {position} returned an unexpected output"
                    )));
                }
                Err(e) => {
                    warn!(problem = position, round, error = %e, "Workspace dropped after a failed solve.");
                    results[position] = None;
                }
            }
        }
    }
    let solve_wall_time = solve_started.elapsed();

    Ok(AmortizedReport {
        backend: config.backend,
        repeats,
        construct_wall_time,
        solve_wall_time,
        construction,
        solves: solves.summary(),
        results,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendRun {
    pub backend: BackendKind,
    pub workers: usize,
    pub wall_time: Duration,
    pub summary: BatchSummary,
}

impl BackendRun {
    /// How many times faster this run was than `baseline`.
    pub fn speedup_over(&self, baseline: &BackendRun) -> f64 {
        let own = self.wall_time.as_secs_f64();
        if own > 0.0 {
            baseline.wall_time.as_secs_f64() / own
        } else {
            f64::INFINITY
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub backend: BackendKind,
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub tolerance: f64,
    pub runs: Vec<BackendRun>,
    pub mismatches: Vec<Mismatch>,
}

impl ComparisonReport {
    pub fn agrees(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn run(&self, backend: BackendKind) -> Option<&BackendRun> {
        self.runs.iter().find(|r| r.backend == backend)
    }
}

/// Runs the same generated batch through each backend in turn and checks that every
/// backend reproduces the first one's statuses and solutions within `tolerance`.
#[instrument(skip_all, name = "compare_workflow", fields(tasks = request.len(), backends = backends.len()))]
pub fn compare(
    request: &BatchRequest,
    source: &dyn ProblemSource,
    config: &DispatchConfig,
    backends: &[BackendKind],
    tolerance: f64,
    reporter: &ProgressReporter,
) -> Result<ComparisonReport, EngineError> {
    let reporter = reporter.scoped(config.verbose);
    let specs = generate_specs(request, source, &reporter);

    let mut reports = Vec::with_capacity(backends.len());
    for &kind in backends {
        let report = run_specs(request, &specs, &config.with_backend(kind), &reporter)?;
        reporter.report(Progress::Message(format!(
            "{:<16} {:>9.1} ms  ({} failure(s))",
            kind.label(),
            report.wall_time.as_secs_f64() * 1e3,
            report.summary.failures
        )));
        reports.push(report);
    }

    let mismatches = match reports.split_first() {
        Some((baseline, rest)) => rest
            .iter()
            .flat_map(|other| find_mismatches(baseline, other, tolerance))
            .collect(),
        None => Vec::new(),
    };
    if !mismatches.is_empty() {
        warn!(count = mismatches.len(), "Backends disagree on some results.");
    }

    let runs = reports
        .into_iter()
        .map(|report| BackendRun {
            backend: report.backend,
            workers: report.workers,
            wall_time: report.wall_time,
            summary: report.summary,
        })
        .collect();
    Ok(ComparisonReport {
        tolerance,
        runs,
        mismatches,
    })
}

fn find_mismatches(baseline: &BatchReport, other: &BatchReport, tolerance: f64) -> Vec<Mismatch> {
    let mismatch = |index: usize, reason: String| Mismatch {
        backend: other.backend,
        index,
        reason,
    };
    if baseline.outcomes.len() != other.outcomes.len() {
        return vec![mismatch(
            0,
            format!(
                "{} outcome(s) instead of {}",
                other.outcomes.len(),
                baseline.outcomes.len()
            ),
        )];
    }

    baseline
        .outcomes
        .iter()
        .zip(&other.outcomes)
        .filter_map(|(want, got)| match (want.solve_result(), got.solve_result()) {
            (Some(a), Some(b)) if a.agrees_with(b, tolerance) => None,
            (Some(a), Some(b)) => Some(mismatch(
                got.index,
                format!(
                    "status {} vs {}, max deviation {:.3e}",
                    a.status,
                    b.status,
                    max_deviation(a, b)
                ),
            )),
            _ => {
                let (a, b) = (OutcomeKind::of(want), OutcomeKind::of(got));
                (a != b).then(|| mismatch(got.index, format!("outcome {a} vs {b}")))
            }
        })
        .collect()
}

fn max_deviation(a: &SolveResult, b: &SolveResult) -> f64 {
    if a.x.len() != b.x.len() {
        return f64::INFINITY;
    }
    a.x.iter()
        .zip(b.x.iter())
        .map(|(p, q)| (p - q).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generate::RandomLeastSquares;
    use crate::core::problem::ConeSpec;
    use crate::engine::config::{DispatchConfigBuilder, ErrorPolicy};
    use crate::engine::error::DispatchError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn config(backend: BackendKind, workers: usize) -> DispatchConfig {
        DispatchConfigBuilder::new()
            .worker_count(workers)
            .backend(backend)
            .build()
            .unwrap()
    }

    #[test]
    fn request_covers_consecutive_seeds() {
        let request = BatchRequest::new(100, 5, 10);
        assert_eq!(request.seeds, 10..15);
        assert_eq!(request.len(), 5);
        let specs = request.generate(&RandomLeastSquares::default());
        assert_eq!(specs.len(), 5);
        assert_eq!(*specs[0], RandomLeastSquares::default().generate(100, 10));
    }

    #[test]
    fn run_reports_every_task_in_order() {
        let request = BatchRequest::new(60, 6, 0);
        let report = run(
            &request,
            &RandomLeastSquares::default(),
            &config(BackendKind::SharedThread, 3),
            &ProgressReporter::new(),
        )
        .unwrap();
        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(report.summary.tasks, 6);
        assert_eq!(report.summary.failures, 0);
        assert!(report.results().all(|r| r.is_some()));
        assert!(report.outcomes.iter().enumerate().all(|(i, o)| o.index == i));
    }

    #[test]
    fn run_surfaces_fail_fast_aborts() {
        let source = RandomLeastSquares::new(ConeSpec::Box {
            lower: 3.0,
            upper: 1.0,
        });
        let mut cfg = config(BackendKind::Sequential, 1);
        cfg.on_error = ErrorPolicy::FailFast;
        let err = run(&BatchRequest::new(30, 3, 0), &source, &cfg, &ProgressReporter::new())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Dispatch(DispatchError::Aborted { index: 0, .. })
        ));
    }

    #[test]
    fn amortized_results_match_direct_solves() {
        let request = BatchRequest::new(60, 4, 2);
        let source = RandomLeastSquares::default();
        let amortized = amortize(
            &request,
            &source,
            &config(BackendKind::SharedThread, 2),
            3,
            &ProgressReporter::new(),
        )
        .unwrap();
        let direct = run(
            &request,
            &source,
            &config(BackendKind::Sequential, 1),
            &ProgressReporter::new(),
        )
        .unwrap();

        assert_eq!(amortized.construction.counts.get(&OutcomeKind::Constructed), Some(&4));
        assert_eq!(amortized.solves.tasks, 12);
        for (a, d) in amortized.results.iter().zip(direct.results()) {
            assert_eq!(a.as_ref().unwrap().x, d.unwrap().x);
        }
    }

    #[test]
    fn construction_path_does_not_change_later_solves() {
        let request = BatchRequest::new(1000, 20, 0);
        let source = RandomLeastSquares::default();
        let sequential = amortize(
            &request,
            &source,
            &config(BackendKind::Sequential, 1),
            1,
            &ProgressReporter::new(),
        )
        .unwrap();
        let threaded = amortize(
            &request,
            &source,
            &config(BackendKind::SharedThread, 4),
            1,
            &ProgressReporter::new(),
        )
        .unwrap();

        assert_eq!(threaded.construction.counts.get(&OutcomeKind::Constructed), Some(&20));
        assert_eq!(sequential.results.len(), 20);
        for (i, (s, t)) in sequential.results.iter().zip(&threaded.results).enumerate() {
            let (s, t) = (s.as_ref().unwrap(), t.as_ref().unwrap());
            assert_eq!(s.status, t.status, "problem {i}");
            assert_eq!(s.x, t.x, "problem {i}");
        }
    }

    #[test]
    fn twenty_problems_solve_identically_in_process() {
        let report = compare(
            &BatchRequest::new(1000, 20, 0),
            &RandomLeastSquares::default(),
            &config(BackendKind::Sequential, 4),
            &[BackendKind::Sequential, BackendKind::SharedThread],
            1e-9,
            &ProgressReporter::new(),
        )
        .unwrap();
        assert!(report.agrees(), "{:?}", report.mismatches);
        for run in &report.runs {
            assert_eq!(run.summary.tasks, 20);
            assert_eq!(run.summary.failures, 0);
        }
    }

    /// Runs a small shared-thread batch and returns (solver messages, overlapping callbacks).
    fn count_messages(verbose: bool) -> (usize, usize) {
        let messages = AtomicUsize::new(0);
        let active = AtomicUsize::new(0);
        let overlap = AtomicUsize::new(0);
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if active.fetch_add(1, Ordering::SeqCst) > 0 {
                overlap.fetch_add(1, Ordering::SeqCst);
            }
            if matches!(event, Progress::Message(_)) {
                messages.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_micros(200));
            active.fetch_sub(1, Ordering::SeqCst);
        }));
        let mut cfg = config(BackendKind::SharedThread, 4);
        cfg.verbose = verbose;

        let report = run(
            &BatchRequest::new(60, 4, 0),
            &RandomLeastSquares::default(),
            &cfg,
            &reporter,
        )
        .unwrap();
        assert_eq!(report.summary.failures, 0);
        drop(reporter);
        (messages.into_inner(), overlap.into_inner())
    }

    #[test]
    fn verbose_dispatch_streams_solver_messages_through_one_gate() {
        let (messages, overlap) = count_messages(true);
        assert!(messages >= 4, "only {messages} solver message(s)");
        assert_eq!(overlap, 0);
    }

    #[test]
    fn quiet_dispatch_emits_no_solver_messages() {
        assert_eq!(count_messages(false).0, 0);
    }

    #[test]
    fn verbose_dispatch_overrides_quiet_request_settings() {
        let request = BatchRequest::new(30, 1, 0);
        let mut cfg = config(BackendKind::Sequential, 1);
        assert!(!request.settings_for(&cfg).verbose);
        cfg.verbose = true;
        assert!(request.settings_for(&cfg).verbose);
    }

    #[test]
    fn amortize_is_refused_by_the_process_backend() {
        let mut cfg = config(BackendKind::IsolatedProcess, 2);
        cfg.process.worker_command =
            Some(crate::engine::backend::process::WorkerCommand::new("/nonexistent/worker"));
        let err = amortize(
            &BatchRequest::new(30, 2, 0),
            &RandomLeastSquares::default(),
            &cfg,
            1,
            &ProgressReporter::new(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Dispatch(DispatchError::Transport(_))));
    }

    #[test]
    fn in_process_backends_agree() {
        let report = compare(
            &BatchRequest::new(80, 5, 0),
            &RandomLeastSquares::default(),
            &config(BackendKind::Sequential, 3),
            &[BackendKind::Sequential, BackendKind::SharedThread],
            1e-9,
            &ProgressReporter::new(),
        )
        .unwrap();
        assert!(report.agrees(), "{:?}", report.mismatches);
        assert_eq!(report.runs.len(), 2);
        assert!(report.run(BackendKind::SharedThread).is_some());
        assert!(report.run(BackendKind::IsolatedProcess).is_none());
    }

    #[test]
    fn disagreements_are_reported_per_task() {
        let request = BatchRequest::new(40, 2, 0);
        let specs = request.generate(&RandomLeastSquares::default());
        let baseline = run_specs(&request, &specs, &config(BackendKind::Sequential, 1), &ProgressReporter::new()).unwrap();

        let mut tweaked = request.clone();
        tweaked.overrides.max_iters = Some(1);
        let other = run_specs(&tweaked, &specs, &config(BackendKind::SharedThread, 2), &ProgressReporter::new()).unwrap();

        let mismatches = find_mismatches(&baseline, &other, 1e-12);
        assert_eq!(mismatches.len(), 2);
        assert!(mismatches.iter().all(|m| m.backend == BackendKind::SharedThread));
    }

    #[test]
    fn speedup_is_relative_to_the_baseline() {
        let summary = ResultCollector::new().summary();
        let run = |millis| BackendRun {
            backend: BackendKind::SharedThread,
            workers: 4,
            wall_time: Duration::from_millis(millis),
            summary: summary.clone(),
        };
        assert!((run(25).speedup_over(&run(100)) - 4.0).abs() < 1e-12);
    }
}
