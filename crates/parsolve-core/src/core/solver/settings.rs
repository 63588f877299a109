use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum SettingsError {
    #[error("'{name}' must be {requirement}, got {value}")]
    OutOfRange {
        name: &'static str,
        requirement: &'static str,
        value: f64,
    },
}

/// Options fixed at workspace construction.
///
/// `rho` is baked into the factorization, so it cannot be overridden per solve. When it
/// is `None` the setup phase picks the mean eigenvalue of `AᵀA`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub max_iters: usize,
    pub eps_abs: f64,
    pub eps_rel: f64,
    pub alpha: f64,
    pub rho: Option<f64>,
    /// Emit per-iteration progress messages. Every message passes through the shared
    /// progress reporter, so this costs parallel throughput.
    pub verbose: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iters: 5000,
            eps_abs: 1e-5,
            eps_rel: 1e-5,
            alpha: 1.5,
            rho: None,
            verbose: false,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_iters == 0 {
            return Err(SettingsError::OutOfRange {
                name: "max_iters",
                requirement: "at least 1",
                value: 0.0,
            });
        }
        check_tolerance("eps_abs", self.eps_abs)?;
        check_tolerance("eps_rel", self.eps_rel)?;
        if !(self.alpha > 0.0 && self.alpha < 2.0) {
            return Err(SettingsError::OutOfRange {
                name: "alpha",
                requirement: "in the open interval (0, 2)",
                value: self.alpha,
            });
        }
        if let Some(rho) = self.rho {
            if !(rho.is_finite() && rho > 0.0) {
                return Err(SettingsError::OutOfRange {
                    name: "rho",
                    requirement: "finite and positive",
                    value: rho,
                });
            }
        }
        Ok(())
    }

    pub fn with_overrides(&self, overrides: &SolveOverrides) -> Result<Self, SettingsError> {
        let merged = Self {
            max_iters: overrides.max_iters.unwrap_or(self.max_iters),
            eps_abs: overrides.eps_abs.unwrap_or(self.eps_abs),
            eps_rel: overrides.eps_rel.unwrap_or(self.eps_rel),
            ..*self
        };
        merged.validate()?;
        Ok(merged)
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.eps_abs.is_finite()
            && self.eps_rel.is_finite()
            && self.alpha.is_finite()
            && self.rho.is_none_or(f64::is_finite)
    }
}

fn check_tolerance(name: &'static str, value: f64) -> Result<(), SettingsError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            name,
            requirement: "finite and non-negative",
            value,
        })
    }
}

/// Per-call adjustments for [`crate::engine::workspace::Workspace::solve`].
///
/// A cold start (the default) resets the iterates, so repeated solves of one workspace
/// are bit-identical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveOverrides {
    pub max_iters: Option<usize>,
    pub eps_abs: Option<f64>,
    pub eps_rel: Option<f64>,
    pub warm_start: bool,
}

impl SolveOverrides {
    pub fn warm() -> Self {
        Self {
            warm_start: true,
            ..Self::default()
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.eps_abs.is_none_or(f64::is_finite) && self.eps_rel.is_none_or(f64::is_finite)
    }
}
