use super::error::SetupError;
use super::result::{SolveResult, SolveStatus, SolveTiming};
use super::settings::SolverSettings;
use super::{IterationSnapshot, SolverEngine};
use crate::core::problem::{ConeSpec, ProblemSpec};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Iteration interval between verbose progress snapshots.
const LOG_INTERVAL: usize = 100;
/// Residuals within this multiple of the tolerance still count as an inaccurate solution.
const INACCURATE_FACTOR: f64 = 10.0;

/// Over-relaxed ADMM for cone-constrained least squares.
///
/// The consensus splitting `x = z` gives the iteration
///
/// ```text
/// x ← (AᵀA + ρI)⁻¹ (Aᵀb + ρ(z − u))
/// x̂ ← αx + (1 − α)z
/// z ← Π_C(x̂ + u)
/// u ← u + x̂ − z
/// ```
///
/// whose only expensive step, the linear system, is served by a Cholesky factor computed
/// once in [`SolverEngine::setup`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Admm;

/// Factorization and iterates for one problem.
#[derive(Debug, Clone)]
pub struct AdmmState {
    factor: Cholesky<f64, Dyn>,
    gram: DMatrix<f64>,
    atb: DVector<f64>,
    btb: f64,
    rho: f64,
    cone: ConeSpec,
    x: DVector<f64>,
    x_hat: DVector<f64>,
    z: DVector<f64>,
    z_prev: DVector<f64>,
    u: DVector<f64>,
}

impl AdmmState {
    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn dimension(&self) -> usize {
        self.z.len()
    }

    fn objective(&self, x: &DVector<f64>) -> f64 {
        let quadratic = x.dot(&(&self.gram * x));
        (0.5 * quadratic - self.atb.dot(x) + 0.5 * self.btb).max(0.0)
    }
}

impl SolverEngine for Admm {
    type State = AdmmState;

    fn name(&self) -> &'static str {
        "admm"
    }

    fn setup(
        &self,
        spec: &ProblemSpec,
        settings: &SolverSettings,
    ) -> Result<AdmmState, SetupError> {
        settings
            .validate()
            .map_err(|e| SetupError::InvalidSettings(e.to_string()))?;
        spec.validate()?;

        let a = spec.a();
        let n = a.ncols();
        let gram = a.tr_mul(a);
        let atb = a.tr_mul(spec.b());
        let btb = spec.b().norm_squared();

        let rho = match settings.rho {
            Some(rho) => rho,
            None => (gram.trace() / n as f64).max(f64::MIN_POSITIVE),
        };
        if !rho.is_finite() {
            return Err(SetupError::Factorization(
                "normal matrix overflowed while choosing the penalty parameter".to_string(),
            ));
        }

        let mut normal = gram.clone();
        for i in 0..n {
            normal[(i, i)] += rho;
        }
        if !normal.iter().all(|v| v.is_finite()) {
            return Err(SetupError::Factorization(format!(
                "{n}x{n} normal matrix contains non-finite entries"
            )));
        }

        let factor = Cholesky::new(normal).ok_or_else(|| {
            SetupError::Factorization(format!("{n}x{n} normal matrix is not positive definite"))
        })?;
        if !factor.l_dirty().diagonal().iter().all(|d| d.is_finite() && *d > 0.0) {
            return Err(SetupError::Factorization(format!(
                "{n}x{n} Cholesky factor is numerically singular"
            )));
        }

        debug!(rows = a.nrows(), cols = n, rho, "ADMM factorization ready.");

        Ok(AdmmState {
            factor,
            gram,
            atb,
            btb,
            rho,
            cone: spec.cone(),
            x: DVector::zeros(n),
            x_hat: DVector::zeros(n),
            z: DVector::zeros(n),
            z_prev: DVector::zeros(n),
            u: DVector::zeros(n),
        })
    }

    fn solve(
        &self,
        s: &mut AdmmState,
        settings: &SolverSettings,
        warm_start: bool,
        observer: &dyn Fn(&IterationSnapshot),
    ) -> SolveResult {
        let started = Instant::now();
        if !warm_start {
            s.z.fill(0.0);
            s.u.fill(0.0);
        }

        let sqrt_n = (s.dimension() as f64).sqrt();
        let alpha = settings.alpha;
        let mut status = SolveStatus::MaxIterations;
        let mut iterations = 0;
        let mut primal_residual = f64::INFINITY;
        let mut dual_residual = f64::INFINITY;
        let mut eps_primal = 0.0;
        let mut eps_dual = 0.0;

        for k in 1..=settings.max_iters {
            iterations = k;

            s.x.copy_from(&s.z);
            s.x -= &s.u;
            s.x *= s.rho;
            s.x += &s.atb;
            s.factor.solve_mut(&mut s.x);

            s.z_prev.copy_from(&s.z);
            s.x_hat.copy_from(&s.x);
            s.x_hat.axpy(1.0 - alpha, &s.z_prev, alpha);

            s.z.copy_from(&s.x_hat);
            s.z += &s.u;
            s.cone.project(&mut s.z);

            s.u += &s.x_hat;
            s.u -= &s.z;

            primal_residual = distance(&s.x, &s.z);
            dual_residual = s.rho * distance(&s.z, &s.z_prev);
            eps_primal = sqrt_n * settings.eps_abs + settings.eps_rel * s.x.norm().max(s.z.norm());
            eps_dual = sqrt_n * settings.eps_abs + settings.eps_rel * s.rho * s.u.norm();

            if settings.verbose && (k == 1 || k % LOG_INTERVAL == 0) {
                observer(&IterationSnapshot {
                    iteration: k,
                    primal_residual,
                    dual_residual,
                    objective: s.objective(&s.z),
                });
            }

            if primal_residual <= eps_primal && dual_residual <= eps_dual {
                status = SolveStatus::Solved;
                break;
            }
        }

        if status == SolveStatus::MaxIterations
            && primal_residual <= INACCURATE_FACTOR * eps_primal
            && dual_residual <= INACCURATE_FACTOR * eps_dual
        {
            status = SolveStatus::SolvedInaccurate;
        }

        trace!(iterations, %status, primal_residual, dual_residual, "ADMM solve finished.");

        SolveResult {
            status,
            x: s.z.clone(),
            y: &s.u * s.rho,
            objective: s.objective(&s.z),
            iterations,
            primal_residual,
            dual_residual,
            timing: SolveTiming {
                setup: Duration::ZERO,
                solve: started.elapsed(),
            },
        }
    }

    fn update_observations(
        &self,
        s: &mut AdmmState,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> Result<(), SetupError> {
        if b.len() != a.nrows() {
            return Err(SetupError::DimensionMismatch {
                rows: a.nrows(),
                cols: a.ncols(),
                rhs: b.len(),
            });
        }
        if !b.iter().all(|v| v.is_finite()) {
            return Err(SetupError::NonFiniteData {
                field: "b".to_string(),
            });
        }
        s.atb = a.tr_mul(b);
        s.btb = b.norm_squared();
        Ok(())
    }
}

fn distance(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p - q) * (p - q))
        .sum::<f64>()
        .sqrt()
}
