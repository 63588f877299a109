use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Terminal status of one solve. Non-convergence is reported here, never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolveStatus {
    Solved,
    SolvedInaccurate,
    MaxIterations,
}

impl SolveStatus {
    pub fn is_solved(self) -> bool {
        matches!(self, Self::Solved | Self::SolvedInaccurate)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Solved => "solved",
            Self::SolvedInaccurate => "solved-inaccurate",
            Self::MaxIterations => "max-iterations",
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveTiming {
    /// Time spent constructing the workspace this result came from.
    pub setup: Duration,
    pub solve: Duration,
}

impl SolveTiming {
    pub fn total(&self) -> Duration {
        self.setup + self.solve
    }
}

/// Record of a completed solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub status: SolveStatus,
    /// Primal solution, always a member of the problem's cone.
    pub x: DVector<f64>,
    /// Scaled dual variable of the consensus constraint.
    pub y: DVector<f64>,
    /// `½‖Ax − b‖²` evaluated at `x`.
    pub objective: f64,
    pub iterations: usize,
    pub primal_residual: f64,
    pub dual_residual: f64,
    pub timing: SolveTiming,
}

impl SolveResult {
    /// Same status and primal vectors within `tolerance` in the max norm. Timing is ignored.
    pub fn agrees_with(&self, other: &Self, tolerance: f64) -> bool {
        self.status == other.status
            && self.x.len() == other.x.len()
            && self
                .x
                .iter()
                .zip(other.x.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}
