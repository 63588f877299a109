use super::backend::{ExecutionBackend, OutcomeSink};
use super::config::ErrorPolicy;
use super::error::{DispatchError, TaskError};
use super::progress::{Progress, ProgressReporter};
use super::task::{Task, TaskOutcome, TaskPayload};
use std::num::NonZeroUsize;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Drives a backend over an ordered batch and hands back outcomes in input order.
///
/// The calling thread blocks for the whole batch. Completion order is only visible
/// through the streaming callback of [`Dispatcher::map_with`].
pub struct Dispatcher<'a> {
    reporter: &'a ProgressReporter<'a>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(reporter: &'a ProgressReporter<'a>) -> Self {
        Self { reporter }
    }

    pub fn map(
        &self,
        payloads: Vec<TaskPayload>,
        backend: &dyn ExecutionBackend,
        worker_count: NonZeroUsize,
        policy: ErrorPolicy,
    ) -> Result<Vec<TaskOutcome>, DispatchError> {
        self.map_with(payloads, backend, worker_count, policy, |_| {})
    }

    /// Like [`Dispatcher::map`], additionally invoking `on_outcome` as each outcome lands.
    #[instrument(skip_all, name = "dispatch", fields(backend = %backend.kind(), tasks = payloads.len(), workers = worker_count.get(), policy = %policy))]
    pub fn map_with<F>(
        &self,
        payloads: Vec<TaskPayload>,
        backend: &dyn ExecutionBackend,
        worker_count: NonZeroUsize,
        policy: ErrorPolicy,
        on_outcome: F,
    ) -> Result<Vec<TaskOutcome>, DispatchError>
    where
        F: Fn(&TaskOutcome) + Sync,
    {
        let tasks: Vec<Task> = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Task { index, payload })
            .collect();
        let total = tasks.len();
        let Some(batch) = NonZeroUsize::new(total) else {
            return Ok(Vec::new());
        };

        backend.admit(&tasks)?;

        let workers = worker_count.min(batch);
        info!(
            "Dispatching {} task(s) to {} {} worker(s).",
            total,
            workers,
            backend.kind()
        );
        self.reporter.report(Progress::PhaseStart { name: "Dispatch" });
        self.reporter.report(Progress::TaskStart {
            total_steps: total as u64,
        });

        let sink = OutcomeSink::new(total, policy, self.reporter, Some(&on_outcome));
        let started = Instant::now();
        let run = backend.run(tasks, workers, &sink);

        self.reporter.report(Progress::TaskFinish);
        self.reporter.report(Progress::PhaseFinish);
        run?;

        let (outcomes, first_failure) = sink.finish();
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        info!(
            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
            failed, "Batch complete."
        );

        match (policy, first_failure) {
            (ErrorPolicy::FailFast, Some(index)) => {
                let source = outcomes[index]
                    .error()
                    .cloned()
                    .unwrap_or(TaskError::Cancelled);
                warn!(task = index, error = %source, "Fail-fast policy aborted the batch.");
                Err(DispatchError::Aborted {
                    index,
                    source,
                    outcomes,
                })
            }
            _ => Ok(outcomes),
        }
    }
}
