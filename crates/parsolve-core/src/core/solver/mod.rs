//! # Solver Module
//!
//! The numerical collaborator behind every workspace. A [`SolverEngine`] splits its work
//! into an expensive one-time `setup` (a matrix factorization) and a cheap, repeatable
//! `solve` that reuses it.
//!
//! The rest of the crate only talks to the trait. [`admm::Admm`] is the bundled engine,
//! an over-relaxed ADMM for cone-constrained least squares.
//!
//! ## Concurrency contract
//!
//! Engines run on whatever thread the backend hands them and must be `Send + Sync`.
//! Engines that wrap native code behind a process-wide cooperative lock must release
//! that lock for the duration of `setup` and `solve`; otherwise shared-thread workers
//! serialize on it and only the isolated-process backend delivers a speedup.

pub mod admm;
pub mod error;
pub mod result;
pub mod settings;

use crate::core::problem::ProblemSpec;
use error::SetupError;
use nalgebra::{DMatrix, DVector};
use result::SolveResult;
use settings::SolverSettings;

/// Residual snapshot handed to the verbose observer during a solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationSnapshot {
    pub iteration: usize,
    pub primal_residual: f64,
    pub dual_residual: f64,
    pub objective: f64,
}

pub trait SolverEngine: Send + Sync {
    /// Factorization plus scratch buffers derived from one problem.
    type State: Send;

    fn name(&self) -> &'static str;

    fn setup(&self, spec: &ProblemSpec, settings: &SolverSettings)
    -> Result<Self::State, SetupError>;

    /// Runs one solve against a prepared state. `observer` is only called when
    /// `settings.verbose` is set. The returned timing carries a zero setup duration.
    fn solve(
        &self,
        state: &mut Self::State,
        settings: &SolverSettings,
        warm_start: bool,
        observer: &dyn Fn(&IterationSnapshot),
    ) -> SolveResult;

    /// Swaps the observation vector without redoing the factorization.
    fn update_observations(
        &self,
        state: &mut Self::State,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> Result<(), SetupError>;
}
