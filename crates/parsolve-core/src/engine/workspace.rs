use super::progress::{Progress, ProgressReporter};
use crate::core::problem::ProblemSpec;
use crate::core::solver::admm::Admm;
use crate::core::solver::error::SetupError;
use crate::core::solver::result::SolveResult;
use crate::core::solver::settings::{SolveOverrides, SolverSettings};
use crate::core::solver::{IterationSnapshot, SolverEngine};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

static NEXT_WORKSPACE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkspaceState {
    Uninitialized,
    Constructing,
    Ready,
    Solving,
    /// Setup failed or a solve panicked. Terminal; a new workspace has to be built from
    /// the spec.
    Failed,
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Constructing => "constructing",
            Self::Ready => "ready",
            Self::Solving => "solving",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum WorkspaceError {
    #[error("Workspace setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("Workspace is {state}, expected {expected}")]
    InvalidState {
        state: WorkspaceState,
        expected: WorkspaceState,
    },

    #[error("Invalid solve overrides: {0}")]
    InvalidOverrides(String),

    #[error("Observation update rejected: {0}")]
    Update(SetupError),
}

/// Reusable solver state bound to one [`ProblemSpec`].
///
/// The expensive factorization happens once in [`Workspace::setup`]; every later
/// [`Workspace::solve`] reuses it. Solving takes `&mut self`, so one instance can only
/// ever be driven by one worker at a time. Parallel batches hold one workspace per task.
pub struct Workspace<E: SolverEngine = Admm> {
    id: u64,
    spec: Arc<ProblemSpec>,
    settings: SolverSettings,
    engine: E,
    state: WorkspaceState,
    prepared: Option<E::State>,
    failure: Option<SetupError>,
    observations: DVector<f64>,
    setup_time: Duration,
    solves: usize,
}

impl Workspace<Admm> {
    pub fn new(spec: impl Into<Arc<ProblemSpec>>, settings: SolverSettings) -> Self {
        Self::with_engine(Admm, spec, settings)
    }

    /// Builds and sets up a workspace in one step.
    pub fn construct(
        spec: impl Into<Arc<ProblemSpec>>,
        settings: SolverSettings,
    ) -> Result<Self, SetupError> {
        Self::construct_with(Admm, spec, settings)
    }
}

impl<E: SolverEngine> Workspace<E> {
    pub fn with_engine(engine: E, spec: impl Into<Arc<ProblemSpec>>, settings: SolverSettings) -> Self {
        let spec = spec.into();
        let observations = spec.b().clone();
        Self {
            id: NEXT_WORKSPACE_ID.fetch_add(1, Ordering::Relaxed),
            spec,
            settings,
            engine,
            state: WorkspaceState::Uninitialized,
            prepared: None,
            failure: None,
            observations,
            setup_time: Duration::ZERO,
            solves: 0,
        }
    }

    pub fn construct_with(
        engine: E,
        spec: impl Into<Arc<ProblemSpec>>,
        settings: SolverSettings,
    ) -> Result<Self, SetupError> {
        let mut workspace = Self::with_engine(engine, spec, settings);
        match workspace.setup() {
            Ok(()) => Ok(workspace),
            Err(WorkspaceError::Setup(e)) => Err(e),
            Err(other) => Err(SetupError::InvalidSettings(other.to_string())),
        }
    }

    /// Runs the one-time setup. Only valid on an uninitialized workspace; a failure
    /// leaves it in [`WorkspaceState::Failed`] for good.
    pub fn setup(&mut self) -> Result<(), WorkspaceError> {
        self.expect_state(WorkspaceState::Uninitialized)?;
        self.state = WorkspaceState::Constructing;

        let start = Instant::now();
        match self.engine.setup(&self.spec, &self.settings) {
            Ok(prepared) => {
                self.setup_time = start.elapsed();
                self.prepared = Some(prepared);
                self.state = WorkspaceState::Ready;
                debug!(
                    workspace = self.id,
                    engine = self.engine.name(),
                    rows = self.spec.rows(),
                    cols = self.spec.cols(),
                    elapsed_ms = self.setup_time.as_secs_f64() * 1e3,
                    "Workspace ready"
                );
                Ok(())
            }
            Err(e) => {
                warn!(workspace = self.id, error = %e, "Workspace setup failed");
                self.state = WorkspaceState::Failed;
                self.failure = Some(e.clone());
                Err(WorkspaceError::Setup(e))
            }
        }
    }

    pub fn solve(&mut self, overrides: &SolveOverrides) -> Result<SolveResult, WorkspaceError> {
        self.solve_with(overrides, &ProgressReporter::new())
    }

    /// Solves against the prepared state. With `verbose` settings every iteration
    /// snapshot the engine emits is forwarded to `reporter` as a message.
    pub fn solve_with(
        &mut self,
        overrides: &SolveOverrides,
        reporter: &ProgressReporter,
    ) -> Result<SolveResult, WorkspaceError> {
        self.expect_state(WorkspaceState::Ready)?;
        let settings = self
            .settings
            .with_overrides(overrides)
            .map_err(|e| WorkspaceError::InvalidOverrides(e.to_string()))?;
        let Some(prepared) = self.prepared.as_mut() else {
            return Err(WorkspaceError::InvalidState {
                state: self.state,
                expected: WorkspaceState::Ready,
            });
        };

        self.state = WorkspaceState::Solving;
        let guard = SolvingGuard {
            state: &mut self.state,
        };
        let id = self.id;
        let observer = |snapshot: &IterationSnapshot| {
            reporter.report(Progress::Message(format!(
                "workspace {}: iter {:>5}  obj {:.6e}  r_prim {:.3e}  r_dual {:.3e}",
                id,
                snapshot.iteration,
                snapshot.objective,
                snapshot.primal_residual,
                snapshot.dual_residual
            )));
        };
        let mut result = self
            .engine
            .solve(prepared, &settings, overrides.warm_start, &observer);
        result.timing.setup = self.setup_time;

        self.solves += 1;
        *guard.state = WorkspaceState::Ready;
        drop(guard);
        debug!(
            workspace = self.id,
            status = %result.status,
            iterations = result.iterations,
            "Solve finished"
        );
        Ok(result)
    }

    /// Replaces the observation vector `b` while keeping the factorization. The bound
    /// spec is left untouched; the workspace solves against its own copy from here on.
    pub fn update_observations(&mut self, b: DVector<f64>) -> Result<(), WorkspaceError> {
        self.expect_state(WorkspaceState::Ready)?;
        let Some(prepared) = self.prepared.as_mut() else {
            return Err(WorkspaceError::InvalidState {
                state: self.state,
                expected: WorkspaceState::Ready,
            });
        };
        self.engine
            .update_observations(prepared, self.spec.a(), &b)
            .map_err(WorkspaceError::Update)?;
        self.observations = b;
        Ok(())
    }

    fn expect_state(&self, expected: WorkspaceState) -> Result<(), WorkspaceError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WorkspaceError::InvalidState {
                state: self.state,
                expected,
            })
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spec(&self) -> &Arc<ProblemSpec> {
        &self.spec
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == WorkspaceState::Ready
    }

    pub fn failure(&self) -> Option<&SetupError> {
        self.failure.as_ref()
    }

    pub fn observations(&self) -> &DVector<f64> {
        &self.observations
    }

    pub fn setup_time(&self) -> Duration {
        self.setup_time
    }

    pub fn solve_count(&self) -> usize {
        self.solves
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }
}

/// Marks the workspace failed when a solve unwinds before handing it back as ready.
struct SolvingGuard<'w> {
    state: &'w mut WorkspaceState,
}

impl Drop for SolvingGuard<'_> {
    fn drop(&mut self) {
        if *self.state == WorkspaceState::Solving {
            *self.state = WorkspaceState::Failed;
        }
    }
}

impl<E: SolverEngine> fmt::Debug for Workspace<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id)
            .field("engine", &self.engine.name())
            .field("state", &self.state)
            .field("rows", &self.spec.rows())
            .field("cols", &self.spec.cols())
            .field("solves", &self.solves)
            .finish_non_exhaustive()
    }
}

/// Construct-then-solve in one call, for callers that never reuse the factorization.
pub fn solve(
    spec: impl Into<Arc<ProblemSpec>>,
    settings: SolverSettings,
) -> Result<SolveResult, WorkspaceError> {
    Workspace::construct(spec, settings)?.solve(&SolveOverrides::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generate::{ProblemSource, RandomLeastSquares};
    use crate::core::problem::ConeSpec;
    use crate::core::solver::result::SolveStatus;
    use nalgebra::DMatrix;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Mutex;

    struct Exploding;

    impl SolverEngine for Exploding {
        type State = ();

        fn name(&self) -> &'static str {
            "exploding"
        }

        fn setup(&self, _: &ProblemSpec, _: &SolverSettings) -> Result<(), SetupError> {
            Ok(())
        }

        fn solve(
            &self,
            _: &mut (),
            _: &SolverSettings,
            _: bool,
            _: &dyn Fn(&IterationSnapshot),
        ) -> SolveResult {
            panic!("engine blew up")
        }

        fn update_observations(
            &self,
            _: &mut (),
            _: &DMatrix<f64>,
            _: &DVector<f64>,
        ) -> Result<(), SetupError> {
            Ok(())
        }
    }

    fn spec(seed: u64) -> Arc<ProblemSpec> {
        Arc::new(RandomLeastSquares::default().generate(60, seed))
    }

    fn broken_spec() -> ProblemSpec {
        let source = RandomLeastSquares::new(ConeSpec::Box {
            lower: 1.0,
            upper: 0.0,
        });
        source.generate(30, 0)
    }

    #[test]
    fn panicking_solve_leaves_the_workspace_failed() {
        let mut ws = Workspace::construct_with(Exploding, spec(0), SolverSettings::default())
            .unwrap();
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            ws.solve(&SolveOverrides::default())
        }));
        assert!(caught.is_err());
        assert_eq!(ws.state(), WorkspaceState::Failed);
        assert_eq!(ws.solve_count(), 0);
        assert!(matches!(
            ws.solve(&SolveOverrides::default()),
            Err(WorkspaceError::InvalidState {
                state: WorkspaceState::Failed,
                ..
            })
        ));
    }

    #[test]
    fn repeated_solves_release_the_spec() {
        let shared = spec(4);
        for _ in 0..25 {
            solve(Arc::clone(&shared), SolverSettings::default()).unwrap();
            let mut ws = Workspace::construct(Arc::clone(&shared), SolverSettings::default()).unwrap();
            ws.solve(&SolveOverrides::default()).unwrap();
            assert_eq!(Arc::strong_count(&shared), 2);
        }
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn new_workspace_starts_uninitialized() {
        let ws = Workspace::new(spec(0), SolverSettings::default());
        assert_eq!(ws.state(), WorkspaceState::Uninitialized);
        assert!(ws.failure().is_none());
        assert_eq!(ws.solve_count(), 0);
    }

    #[test]
    fn setup_moves_to_ready_and_records_time() {
        let mut ws = Workspace::new(spec(0), SolverSettings::default());
        ws.setup().unwrap();
        assert!(ws.is_ready());
        assert!(ws.setup_time() > Duration::ZERO);
    }

    #[test]
    fn failed_setup_is_terminal() {
        let mut ws = Workspace::new(broken_spec(), SolverSettings::default());
        let err = ws.setup().unwrap_err();
        assert!(matches!(err, WorkspaceError::Setup(SetupError::InvalidCone(_))));
        assert_eq!(ws.state(), WorkspaceState::Failed);
        assert!(ws.failure().is_some());

        let retry = ws.setup().unwrap_err();
        assert_eq!(
            retry,
            WorkspaceError::InvalidState {
                state: WorkspaceState::Failed,
                expected: WorkspaceState::Uninitialized,
            }
        );
        assert!(ws.solve(&SolveOverrides::default()).is_err());
    }

    #[test]
    fn construct_surfaces_setup_error_directly() {
        let err = Workspace::construct(broken_spec(), SolverSettings::default()).unwrap_err();
        assert!(matches!(err, SetupError::InvalidCone(_)));
    }

    #[test]
    fn solve_before_setup_is_rejected() {
        let mut ws = Workspace::new(spec(0), SolverSettings::default());
        let err = ws.solve(&SolveOverrides::default()).unwrap_err();
        assert_eq!(
            err,
            WorkspaceError::InvalidState {
                state: WorkspaceState::Uninitialized,
                expected: WorkspaceState::Ready,
            }
        );
    }

    #[test]
    fn repeated_cold_solves_are_identical() {
        let mut ws = Workspace::construct(spec(3), SolverSettings::default()).unwrap();
        let first = ws.solve(&SolveOverrides::default()).unwrap();
        let second = ws.solve(&SolveOverrides::default()).unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.x, second.x);
        assert_eq!(first.iterations, second.iterations);
        assert_eq!(ws.solve_count(), 2);
        assert!(ws.is_ready());
    }

    #[test]
    fn workspaces_from_identical_specs_agree() {
        let a = Workspace::construct(spec(5), SolverSettings::default())
            .unwrap()
            .solve(&SolveOverrides::default())
            .unwrap();
        let b = Workspace::construct(spec(5), SolverSettings::default())
            .unwrap()
            .solve(&SolveOverrides::default())
            .unwrap();
        assert_eq!(a.status, b.status);
        assert_eq!(a.x, b.x);
    }

    #[test]
    fn solve_result_carries_setup_time() {
        let mut ws = Workspace::construct(spec(1), SolverSettings::default()).unwrap();
        let result = ws.solve(&SolveOverrides::default()).unwrap();
        assert_eq!(result.timing.setup, ws.setup_time());
    }

    #[test]
    fn workspace_stays_bound_to_its_spec() {
        let shared = spec(2);
        let ws = Workspace::construct(Arc::clone(&shared), SolverSettings::default()).unwrap();
        assert!(Arc::ptr_eq(ws.spec(), &shared));
    }

    #[test]
    fn invalid_overrides_leave_workspace_ready() {
        let mut ws = Workspace::construct(spec(0), SolverSettings::default()).unwrap();
        let overrides = SolveOverrides {
            eps_abs: Some(-1.0),
            ..SolveOverrides::default()
        };
        let err = ws.solve(&overrides).unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidOverrides(_)));
        assert!(ws.is_ready());
    }

    #[test]
    fn iteration_budget_is_reported_in_band() {
        let mut ws = Workspace::construct(spec(4), SolverSettings::default()).unwrap();
        let overrides = SolveOverrides {
            max_iters: Some(1),
            eps_abs: Some(1e-12),
            eps_rel: Some(1e-12),
            ..SolveOverrides::default()
        };
        let result = ws.solve(&overrides).unwrap();
        assert_eq!(result.status, SolveStatus::MaxIterations);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn update_observations_keeps_spec_untouched() {
        let shared = spec(6);
        let original_b = shared.b().clone();
        let mut ws = Workspace::construct(Arc::clone(&shared), SolverSettings::default()).unwrap();
        let before = ws.solve(&SolveOverrides::default()).unwrap();

        let flipped = -original_b.clone();
        ws.update_observations(flipped.clone()).unwrap();
        let after = ws.solve(&SolveOverrides::default()).unwrap();

        assert_eq!(shared.b(), &original_b);
        assert_eq!(ws.observations(), &flipped);
        assert_ne!(before.x, after.x);
    }

    #[test]
    fn update_observations_rejects_wrong_length() {
        let mut ws = Workspace::construct(spec(0), SolverSettings::default()).unwrap();
        let err = ws.update_observations(DVector::zeros(3)).unwrap_err();
        assert!(matches!(err, WorkspaceError::Update(_)));
        assert!(ws.is_ready());
    }

    #[test]
    fn verbose_solves_forward_iteration_messages() {
        let settings = SolverSettings {
            verbose: true,
            ..SolverSettings::default()
        };
        let messages = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if let Progress::Message(text) = event {
                messages.lock().unwrap().push(text);
            }
        }));
        let mut ws = Workspace::construct(spec(0), settings).unwrap();
        ws.solve_with(&SolveOverrides::default(), &reporter).unwrap();
        drop(reporter);

        let messages = messages.into_inner().unwrap();
        assert!(!messages.is_empty());
        assert!(messages[0].starts_with(&format!("workspace {}:", ws.id())));
    }

    #[test]
    fn quiet_solves_emit_nothing() {
        let count = Mutex::new(0usize);
        let reporter = ProgressReporter::with_callback(Box::new(|_| {
            *count.lock().unwrap() += 1;
        }));
        let mut ws = Workspace::construct(spec(0), SolverSettings::default()).unwrap();
        ws.solve_with(&SolveOverrides::default(), &reporter).unwrap();
        drop(reporter);
        assert_eq!(count.into_inner().unwrap(), 0);
    }

    #[test]
    fn one_shot_solve_matches_workspace_solve() {
        let direct = solve(spec(8), SolverSettings::default()).unwrap();
        let mut ws = Workspace::construct(spec(8), SolverSettings::default()).unwrap();
        let reused = ws.solve(&SolveOverrides::default()).unwrap();
        assert_eq!(direct.x, reused.x);
    }

    #[test]
    fn workspace_error_survives_serialization() {
        let err = WorkspaceError::Setup(SetupError::InvalidCone("lower > upper".into()));
        let json = serde_json::to_string(&err).unwrap();
        let back: WorkspaceError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
