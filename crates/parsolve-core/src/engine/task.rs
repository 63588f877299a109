use super::error::TaskError;
use super::progress::ProgressReporter;
use super::workspace::Workspace;
use crate::core::problem::ProblemSpec;
use crate::core::solver::result::SolveResult;
use crate::core::solver::settings::{SolveOverrides, SolverSettings};
use std::sync::Arc;
use std::time::Duration;

/// What a task asks its worker to do. One enum covers every call shape, so backends
/// never special-case between "solve a spec" and "drive an existing workspace".
#[derive(Debug)]
pub enum TaskPayload {
    /// Construct and solve entirely inside the worker. Fully transportable.
    Solve {
        spec: Arc<ProblemSpec>,
        settings: SolverSettings,
        overrides: SolveOverrides,
    },
    /// Construct only. The resulting workspace has to stay in the caller's address space.
    Setup {
        spec: Arc<ProblemSpec>,
        settings: SolverSettings,
    },
    /// Solve an already-constructed workspace and hand it back with the result. A task
    /// cancelled before it starts returns the workspace through
    /// [`TaskOutcome::returned`]; one whose solve fails or panics drops it.
    Resolve {
        workspace: Box<Workspace>,
        overrides: SolveOverrides,
    },
}

impl TaskPayload {
    pub fn solve(spec: Arc<ProblemSpec>, settings: SolverSettings) -> Self {
        Self::Solve {
            spec,
            settings,
            overrides: SolveOverrides::default(),
        }
    }

    pub fn setup(spec: Arc<ProblemSpec>, settings: SolverSettings) -> Self {
        Self::Setup { spec, settings }
    }

    pub fn resolve(workspace: Box<Workspace>, overrides: SolveOverrides) -> Self {
        Self::Resolve {
            workspace,
            overrides,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Solve { .. } => "solve",
            Self::Setup { .. } => "setup",
            Self::Resolve { .. } => "resolve",
        }
    }

    /// Why this payload cannot be shipped to a separate process, if it cannot.
    pub fn transport_barrier(&self) -> Option<String> {
        match self {
            Self::Solve {
                spec,
                settings,
                overrides,
            } => {
                if !spec.is_transportable() {
                    Some("problem data contains non-finite values".to_string())
                } else if !settings.is_finite() || !overrides.is_finite() {
                    Some("solver options contain non-finite values".to_string())
                } else {
                    None
                }
            }
            Self::Setup { .. } => {
                Some("setup produces a live workspace, which cannot leave its process".to_string())
            }
            Self::Resolve { workspace, .. } => Some(format!(
                "payload carries live workspace {}, which cannot leave its process",
                workspace.id()
            )),
        }
    }

    pub(crate) fn execute(self, reporter: &ProgressReporter) -> Result<TaskOutput, TaskError> {
        match self {
            Self::Solve {
                spec,
                settings,
                overrides,
            } => {
                let mut workspace = Workspace::construct(spec, settings)?;
                let result = workspace.solve_with(&overrides, reporter)?;
                Ok(TaskOutput::Solved(result))
            }
            Self::Setup { spec, settings } => {
                let workspace = Workspace::construct(spec, settings)?;
                Ok(TaskOutput::Constructed(Box::new(workspace)))
            }
            Self::Resolve {
                mut workspace,
                overrides,
            } => {
                let result = workspace.solve_with(&overrides, reporter)?;
                Ok(TaskOutput::Resolved { workspace, result })
            }
        }
    }
}

/// A payload pinned to its position in the submitted batch.
#[derive(Debug)]
pub struct Task {
    pub index: usize,
    pub payload: TaskPayload,
}

#[derive(Debug)]
pub enum TaskOutput {
    Solved(SolveResult),
    Constructed(Box<Workspace>),
    Resolved {
        workspace: Box<Workspace>,
        result: SolveResult,
    },
}

impl TaskOutput {
    pub fn solve_result(&self) -> Option<&SolveResult> {
        match self {
            Self::Solved(result) | Self::Resolved { result, .. } => Some(result),
            Self::Constructed(_) => None,
        }
    }

    pub fn into_workspace(self) -> Option<Box<Workspace>> {
        match self {
            Self::Constructed(workspace) | Self::Resolved { workspace, .. } => Some(workspace),
            Self::Solved(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub index: usize,
    pub result: Result<TaskOutput, TaskError>,
    pub wall_time: Duration,
    /// Label of the worker that ran the task; `None` when it never ran.
    pub worker: Option<String>,
    /// Live workspace of a resolve task that was cancelled before it started.
    pub returned: Option<Box<Workspace>>,
}

impl TaskOutcome {
    pub(crate) fn cancelled(index: usize) -> Self {
        Self {
            index,
            result: Err(TaskError::Cancelled),
            wall_time: Duration::ZERO,
            worker: None,
            returned: None,
        }
    }

    /// Cancellation outcome for a task that never started.
    pub(crate) fn skipped(task: Task) -> Self {
        let returned = match task.payload {
            TaskPayload::Resolve { workspace, .. } => Some(workspace),
            TaskPayload::Solve { .. } | TaskPayload::Setup { .. } => None,
        };
        Self {
            returned,
            ..Self::cancelled(task.index)
        }
    }

    /// The workspace this outcome carries, whether produced by the task or handed back
    /// unused.
    pub fn into_workspace(self) -> Option<Box<Workspace>> {
        match self.result {
            Ok(output) => output.into_workspace(),
            Err(_) => self.returned,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.result.as_ref().err()
    }

    pub fn solve_result(&self) -> Option<&SolveResult> {
        self.result.as_ref().ok().and_then(TaskOutput::solve_result)
    }
}
