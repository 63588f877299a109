use super::config::ConfigError;
use super::task::TaskOutcome;
use super::workspace::WorkspaceError;
use crate::core::solver::error::SetupError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single task. Always delivered as that task's outcome, never by unwinding
/// the batch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    #[error("Setup failed: {0}")]
    Setup(SetupError),

    #[error("Workspace rejected the call: {0}")]
    Workspace(WorkspaceError),

    #[error("Worker crashed (exit code {exit_code:?}): {stderr}")]
    WorkerCrash {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Task exceeded its time limit of {limit:?}")]
    Timeout { limit: Duration },

    #[error("Task panicked: {message}")]
    Panicked { message: String },

    #[error("Task was cancelled before it completed")]
    Cancelled,
}

impl From<WorkspaceError> for TaskError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::Setup(e) => Self::Setup(e),
            other => Self::Workspace(other),
        }
    }
}

impl From<SetupError> for TaskError {
    fn from(err: SetupError) -> Self {
        Self::Setup(err)
    }
}

/// A task whose inputs or outputs cannot cross the isolation boundary of the backend it
/// was submitted to. Raised before any worker is engaged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Task {index} ({task}) cannot be sent to an isolated worker: {reason}")]
pub struct TaskTransportError {
    pub index: usize,
    pub task: &'static str,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Transport(#[from] TaskTransportError),

    #[error("Failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to start supervisor thread: {0}")]
    Supervisor(#[source] io::Error),

    #[error("Cannot locate worker executable: {0}")]
    WorkerExecutable(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TaskTransportError),

    #[error("Backend failure: {0}")]
    Backend(BackendError),

    /// Fail-fast stop. `outcomes` is still the complete ordered list; tasks that never
    /// ran are marked [`TaskError::Cancelled`].
    #[error("Batch aborted after task {index} failed: {source}")]
    Aborted {
        index: usize,
        source: TaskError,
        outcomes: Vec<TaskOutcome>,
    },
}

impl From<BackendError> for DispatchError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Transport(e) => Self::Transport(e),
            other => Self::Backend(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Backend could not be prepared: {0}")]
    Backend(#[from] BackendError),

    #[error("Internal logic error: {0}")]
    Internal(String),
}
