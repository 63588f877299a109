use super::error::TaskError;
use super::task::{TaskOutcome, TaskOutput};
use crate::core::solver::result::SolveStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Solved,
    SolvedInaccurate,
    MaxIterations,
    Constructed,
    SetupFailed,
    /// The workspace refused the call (wrong lifecycle state or invalid overrides).
    Rejected,
    WorkerCrash,
    Timeout,
    Panicked,
    Cancelled,
}

impl OutcomeKind {
    pub fn of(outcome: &TaskOutcome) -> Self {
        match &outcome.result {
            Ok(TaskOutput::Constructed(_)) => Self::Constructed,
            Ok(TaskOutput::Solved(result)) | Ok(TaskOutput::Resolved { result, .. }) => {
                match result.status {
                    SolveStatus::Solved => Self::Solved,
                    SolveStatus::SolvedInaccurate => Self::SolvedInaccurate,
                    SolveStatus::MaxIterations => Self::MaxIterations,
                }
            }
            Err(TaskError::Setup(_)) => Self::SetupFailed,
            Err(TaskError::Workspace(_)) => Self::Rejected,
            Err(TaskError::WorkerCrash { .. }) => Self::WorkerCrash,
            Err(TaskError::Timeout { .. }) => Self::Timeout,
            Err(TaskError::Panicked { .. }) => Self::Panicked,
            Err(TaskError::Cancelled) => Self::Cancelled,
        }
    }

    /// Whether the task itself failed. Hitting the iteration budget is not a failure.
    pub fn is_failure(self) -> bool {
        !matches!(
            self,
            Self::Solved | Self::SolvedInaccurate | Self::MaxIterations | Self::Constructed
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Solved => "solved",
            Self::SolvedInaccurate => "solved-inaccurate",
            Self::MaxIterations => "max-iterations",
            Self::Constructed => "constructed",
            Self::SetupFailed => "setup-failed",
            Self::Rejected => "rejected",
            Self::WorkerCrash => "worker-crash",
            Self::Timeout => "timeout",
            Self::Panicked => "panicked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub tasks: usize,
    pub failures: usize,
    pub counts: BTreeMap<OutcomeKind, usize>,
    pub timing: Option<TimingStats>,
}

/// Fold over finished outcomes: counts per kind plus per-task wall-time statistics.
/// Tasks that never ran are counted but left out of the timing figures.
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    kinds: Vec<OutcomeKind>,
    wall_times: Vec<Duration>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: &TaskOutcome) {
        self.kinds.push(OutcomeKind::of(outcome));
        if outcome.worker.is_some() {
            self.wall_times.push(outcome.wall_time);
        }
    }

    pub fn extend<'o>(&mut self, outcomes: impl IntoIterator<Item = &'o TaskOutcome>) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.kinds.iter().filter(|k| **k == kind).count()
    }

    pub fn counts(&self) -> BTreeMap<OutcomeKind, usize> {
        let mut counts = BTreeMap::new();
        for kind in &self.kinds {
            *counts.entry(*kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn failures(&self) -> usize {
        self.kinds.iter().filter(|k| k.is_failure()).count()
    }

    pub fn timing(&self) -> Option<TimingStats> {
        let min = *self.wall_times.iter().min()?;
        let max = *self.wall_times.iter().max()?;
        let total: Duration = self.wall_times.iter().sum();
        let mean = total / self.wall_times.len() as u32;
        Some(TimingStats {
            min,
            max,
            mean,
            total,
        })
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            tasks: self.len(),
            failures: self.failures(),
            counts: self.counts(),
            timing: self.timing(),
        }
    }
}

impl<'o> FromIterator<&'o TaskOutcome> for ResultCollector {
    fn from_iter<I: IntoIterator<Item = &'o TaskOutcome>>(iter: I) -> Self {
        let mut collector = Self::new();
        collector.extend(iter);
        collector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::solver::error::SetupError;
    use crate::core::solver::result::{SolveResult, SolveTiming};
    use nalgebra::DVector;

    fn solved(index: usize, status: SolveStatus, millis: u64) -> TaskOutcome {
        TaskOutcome {
            index,
            result: Ok(TaskOutput::Solved(SolveResult {
                status,
                x: DVector::zeros(1),
                y: DVector::zeros(1),
                objective: 0.0,
                iterations: 1,
                primal_residual: 0.0,
                dual_residual: 0.0,
                timing: SolveTiming::default(),
            })),
            wall_time: Duration::from_millis(millis),
            worker: Some("w".into()),
            returned: None,
        }
    }

    fn failed(index: usize, error: TaskError, millis: u64) -> TaskOutcome {
        TaskOutcome {
            index,
            result: Err(error),
            wall_time: Duration::from_millis(millis),
            worker: Some("w".into()),
            returned: None,
        }
    }

    #[test]
    fn empty_collector_has_no_timing() {
        let collector = ResultCollector::new();
        assert!(collector.is_empty());
        assert!(collector.timing().is_none());
        assert_eq!(collector.summary().tasks, 0);
    }

    #[test]
    fn kinds_are_counted() {
        let outcomes = vec![
            solved(0, SolveStatus::Solved, 10),
            solved(1, SolveStatus::Solved, 20),
            solved(2, SolveStatus::MaxIterations, 30),
            failed(3, TaskError::Setup(SetupError::InvalidCone("x".into())), 1),
            failed(
                4,
                TaskError::WorkerCrash {
                    exit_code: Some(1),
                    stderr: String::new(),
                },
                5,
            ),
            TaskOutcome::cancelled(5),
        ];
        let collector: ResultCollector = outcomes.iter().collect();

        assert_eq!(collector.len(), 6);
        assert_eq!(collector.count(OutcomeKind::Solved), 2);
        assert_eq!(collector.count(OutcomeKind::MaxIterations), 1);
        assert_eq!(collector.count(OutcomeKind::SetupFailed), 1);
        assert_eq!(collector.count(OutcomeKind::WorkerCrash), 1);
        assert_eq!(collector.count(OutcomeKind::Cancelled), 1);
        assert_eq!(collector.count(OutcomeKind::Timeout), 0);
        assert_eq!(collector.failures(), 3);
        assert_eq!(collector.counts().values().sum::<usize>(), 6);
    }

    #[test]
    fn timing_skips_tasks_that_never_ran() {
        let outcomes = [
            solved(0, SolveStatus::Solved, 10),
            solved(1, SolveStatus::Solved, 30),
            TaskOutcome::cancelled(2),
        ];
        let timing = ResultCollector::from_iter(&outcomes).timing().unwrap();
        assert_eq!(timing.min, Duration::from_millis(10));
        assert_eq!(timing.max, Duration::from_millis(30));
        assert_eq!(timing.mean, Duration::from_millis(20));
        assert_eq!(timing.total, Duration::from_millis(40));
    }

    #[test]
    fn summary_serializes_with_kebab_case_keys() {
        let outcomes = [solved(0, SolveStatus::SolvedInaccurate, 1)];
        let summary = ResultCollector::from_iter(&outcomes).summary();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["counts"]["solved-inaccurate"], 1);
        assert_eq!(json["tasks"], 1);
    }

    #[test]
    fn iteration_budget_is_not_a_failure() {
        assert!(!OutcomeKind::MaxIterations.is_failure());
        assert!(OutcomeKind::Panicked.is_failure());
        assert_eq!(OutcomeKind::WorkerCrash.to_string(), "worker-crash");
    }
}
