//! # Execution Backends
//!
//! Strategies for running an indexed batch of tasks on a bounded set of workers. Every
//! backend honours the same contract: at most `worker_count` tasks are active at once,
//! the call blocks until each task has an outcome, and each outcome is recorded in the
//! [`OutcomeSink`] slot of its task index, so completion order never leaks into results.
//!
//! - [`sequential`] - The calling thread, one task at a time; the baseline
//! - [`thread`] - A rayon pool scoped to one batch; live workspaces pass freely
//! - [`process`] - One child process per task; only transportable payloads are admitted

pub mod process;
pub mod sequential;
pub mod thread;

use super::config::{BackendKind, DispatchConfig, ErrorPolicy};
use super::error::{BackendError, TaskError, TaskTransportError};
use super::progress::{Progress, ProgressReporter};
use super::task::{Task, TaskOutcome, TaskOutput};
use process::{IsolatedProcessBackend, WorkerCommand};
use sequential::SequentialBackend;
use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use thread::SharedThreadBackend;
use tracing::warn;

pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Checks the whole batch before any worker is engaged.
    fn admit(&self, tasks: &[Task]) -> Result<(), TaskTransportError> {
        let _ = tasks;
        Ok(())
    }

    /// Runs every task and records one outcome per task in `sink`. Tasks skipped because
    /// the sink was cancelled may be left unrecorded.
    fn run(
        &self,
        tasks: Vec<Task>,
        worker_count: NonZeroUsize,
        sink: &OutcomeSink,
    ) -> Result<(), BackendError>;
}

pub fn from_config(config: &DispatchConfig) -> Result<Box<dyn ExecutionBackend>, BackendError> {
    Ok(match config.backend {
        BackendKind::Sequential => Box::new(SequentialBackend),
        BackendKind::SharedThread => Box::new(SharedThreadBackend::default()),
        BackendKind::IsolatedProcess => {
            let command = match &config.process.worker_command {
                Some(command) => command.clone(),
                None => WorkerCommand::current_exe().map_err(BackendError::WorkerExecutable)?,
            };
            Box::new(IsolatedProcessBackend::new(command).with_timeout(config.process.task_timeout))
        }
    })
}

/// Runs one task body on the current thread, turning a panic into a task error.
pub(crate) fn run_guarded<F>(index: usize, worker: Option<String>, body: F) -> TaskOutcome
where
    F: FnOnce() -> Result<TaskOutput, TaskError>,
{
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        Err(TaskError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    });
    TaskOutcome {
        index,
        result,
        wall_time: started.elapsed(),
        worker,
        returned: None,
    }
}

pub(crate) fn execute_in_place(task: Task, sink: &OutcomeSink, worker: Option<String>) {
    let Task { index, payload } = task;
    let outcome = run_guarded(index, worker, || payload.execute(sink.reporter()));
    sink.record(outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

type OutcomeObserver<'a> = &'a (dyn Fn(&TaskOutcome) + Sync + 'a);

struct Slots {
    outcomes: Vec<Option<TaskOutcome>>,
    first_failure: Option<usize>,
}

/// Thread-safe landing table for outcomes, indexed by task position.
///
/// Under [`ErrorPolicy::FailFast`] the first recorded failure trips the cancellation
/// flag; backends check it before starting each task.
pub struct OutcomeSink<'a> {
    slots: Mutex<Slots>,
    cancelled: AtomicBool,
    policy: ErrorPolicy,
    reporter: &'a ProgressReporter<'a>,
    observer: Option<OutcomeObserver<'a>>,
}

impl<'a> OutcomeSink<'a> {
    pub(crate) fn new(
        len: usize,
        policy: ErrorPolicy,
        reporter: &'a ProgressReporter<'a>,
        observer: Option<OutcomeObserver<'a>>,
    ) -> Self {
        Self {
            slots: Mutex::new(Slots {
                outcomes: (0..len).map(|_| None).collect(),
                first_failure: None,
            }),
            cancelled: AtomicBool::new(false),
            policy,
            reporter,
            observer,
        }
    }

    pub fn record(&self, outcome: TaskOutcome) {
        let failed = matches!(&outcome.result, Err(e) if *e != TaskError::Cancelled);
        if failed {
            if let Some(err) = outcome.error() {
                warn!(task = outcome.index, error = %err, "Task failed");
            }
            if self.policy == ErrorPolicy::FailFast {
                self.cancel();
            }
        }
        if let Some(observer) = self.observer {
            observer(&outcome);
        }
        self.reporter.report(Progress::TaskIncrement);

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let index = outcome.index;
        if failed && slots.first_failure.is_none() {
            slots.first_failure = Some(index);
        }
        match slots.outcomes.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(outcome),
            Some(_) => warn!(task = index, "Duplicate outcome ignored"),
            None => warn!(task = index, "Outcome for unknown task ignored"),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reporter(&self) -> &ProgressReporter<'a> {
        self.reporter
    }

    /// Ordered outcomes, with [`TaskError::Cancelled`] standing in for every task that
    /// never ran, plus the index of the first failure in completion order.
    pub(crate) fn finish(self) -> (Vec<TaskOutcome>, Option<usize>) {
        let slots = self
            .slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let outcomes = slots
            .outcomes
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or_else(|| TaskOutcome::cancelled(index)))
            .collect();
        (outcomes, slots.first_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::solver::error::SetupError;
    use std::time::Duration;

    fn failed(index: usize) -> TaskOutcome {
        TaskOutcome {
            index,
            result: Err(TaskError::Setup(SetupError::InvalidCone("bad".into()))),
            wall_time: Duration::ZERO,
            worker: None,
            returned: None,
        }
    }

    #[test]
    fn run_guarded_converts_panics() {
        let outcome = run_guarded(4, Some("t".into()), || panic!("boom"));
        assert_eq!(outcome.index, 4);
        assert_eq!(
            outcome.error(),
            Some(&TaskError::Panicked {
                message: "boom".to_string()
            })
        );
    }

    #[test]
    fn run_guarded_keeps_formatted_panic_messages() {
        let code = 7;
        let outcome = run_guarded(0, None, || panic!("code {code}"));
        assert!(matches!(
            outcome.error(),
            Some(TaskError::Panicked { message }) if message == "code 7"
        ));
    }

    #[test]
    fn sink_fills_unrecorded_slots_with_cancellations() {
        let reporter = ProgressReporter::new();
        let sink = OutcomeSink::new(3, ErrorPolicy::CollectAll, &reporter, None);
        sink.record(failed(1));
        let (outcomes, first) = sink.finish();
        assert_eq!(first, Some(1));
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].error(), Some(&TaskError::Cancelled));
        assert!(matches!(outcomes[1].error(), Some(TaskError::Setup(_))));
        assert_eq!(outcomes[2].index, 2);
    }

    #[test]
    fn collect_all_never_cancels() {
        let reporter = ProgressReporter::new();
        let sink = OutcomeSink::new(2, ErrorPolicy::CollectAll, &reporter, None);
        sink.record(failed(0));
        assert!(!sink.is_cancelled());
    }

    #[test]
    fn fail_fast_cancels_on_first_failure() {
        let reporter = ProgressReporter::new();
        let sink = OutcomeSink::new(2, ErrorPolicy::FailFast, &reporter, None);
        sink.record(failed(1));
        assert!(sink.is_cancelled());
        sink.record(failed(0));
        let (_, first) = sink.finish();
        assert_eq!(first, Some(1));
    }

    #[test]
    fn cancelled_outcomes_are_not_failures() {
        let reporter = ProgressReporter::new();
        let sink = OutcomeSink::new(1, ErrorPolicy::FailFast, &reporter, None);
        sink.record(TaskOutcome::cancelled(0));
        assert!(!sink.is_cancelled());
        assert_eq!(sink.finish().1, None);
    }

    #[test]
    fn observer_sees_each_outcome() {
        let seen = Mutex::new(Vec::new());
        let observer = |outcome: &TaskOutcome| seen.lock().unwrap().push(outcome.index);
        let reporter = ProgressReporter::new();
        let sink = OutcomeSink::new(3, ErrorPolicy::CollectAll, &reporter, Some(&observer));
        sink.record(failed(2));
        sink.record(failed(0));
        drop(sink);
        assert_eq!(seen.into_inner().unwrap(), vec![2, 0]);
    }

    #[test]
    fn duplicate_outcomes_keep_the_first() {
        let reporter = ProgressReporter::new();
        let sink = OutcomeSink::new(1, ErrorPolicy::CollectAll, &reporter, None);
        sink.record(failed(0));
        sink.record(TaskOutcome::cancelled(0));
        let (outcomes, _) = sink.finish();
        assert!(matches!(outcomes[0].error(), Some(TaskError::Setup(_))));
    }
}
