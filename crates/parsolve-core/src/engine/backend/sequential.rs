use super::{ExecutionBackend, OutcomeSink, execute_in_place};
use crate::engine::config::BackendKind;
use crate::engine::error::BackendError;
use crate::engine::task::{Task, TaskOutcome};
use std::num::NonZeroUsize;

/// Runs every task on the calling thread in input order. `worker_count` is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialBackend;

impl ExecutionBackend for SequentialBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sequential
    }

    fn run(
        &self,
        tasks: Vec<Task>,
        _worker_count: NonZeroUsize,
        sink: &OutcomeSink,
    ) -> Result<(), BackendError> {
        for task in tasks {
            if sink.is_cancelled() {
                sink.record(TaskOutcome::skipped(task));
                continue;
            }
            execute_in_place(task, sink, Some("caller".to_string()));
        }
        Ok(())
    }
}
