use super::{ExecutionBackend, OutcomeSink, execute_in_place};
use crate::engine::config::BackendKind;
use crate::engine::error::BackendError;
use crate::engine::task::{Task, TaskOutcome};
use rayon::ThreadPoolBuilder;
use std::num::NonZeroUsize;
use tracing::debug;

/// Runs tasks on OS threads that share the caller's memory, so live workspaces can be
/// handed to workers directly.
///
/// The pool is built for one `run` call and torn down when it returns, on every path.
/// Speedup over [`super::sequential::SequentialBackend`] depends on the solver engine not
/// holding a process-wide lock while it computes. An in-flight task cannot be interrupted;
/// cancellation only stops tasks that have not started yet.
#[derive(Debug, Clone)]
pub struct SharedThreadBackend {
    thread_prefix: String,
}

impl Default for SharedThreadBackend {
    fn default() -> Self {
        Self {
            thread_prefix: "parsolve-worker".to_string(),
        }
    }
}

impl SharedThreadBackend {
    pub fn with_thread_prefix(prefix: impl Into<String>) -> Self {
        Self {
            thread_prefix: prefix.into(),
        }
    }
}

impl ExecutionBackend for SharedThreadBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SharedThread
    }

    fn run(
        &self,
        tasks: Vec<Task>,
        worker_count: NonZeroUsize,
        sink: &OutcomeSink,
    ) -> Result<(), BackendError> {
        if tasks.is_empty() {
            return Ok(());
        }
        let threads = worker_count.get().min(tasks.len());
        let prefix = self.thread_prefix.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()?;
        debug!(threads, tasks = tasks.len(), "Worker pool started");

        pool.scope_fifo(|scope| {
            for task in tasks {
                scope.spawn_fifo(move |_| {
                    if sink.is_cancelled() {
                        sink.record(TaskOutcome::skipped(task));
                        return;
                    }
                    let worker = std::thread::current().name().map(str::to_owned);
                    execute_in_place(task, sink, worker);
                });
            }
        });

        debug!("Worker pool drained");
        Ok(())
    }
}
