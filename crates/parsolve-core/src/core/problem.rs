use super::solver::error::SetupError;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Constraint set `C` for the decision vector of a least-squares problem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum ConeSpec {
    Free,
    NonNegative,
    Box { lower: f64, upper: f64 },
}

impl Default for ConeSpec {
    fn default() -> Self {
        Self::Box {
            lower: 0.0,
            upper: 1.0,
        }
    }
}

impl ConeSpec {
    pub fn validate(&self) -> Result<(), SetupError> {
        match *self {
            Self::Free | Self::NonNegative => Ok(()),
            Self::Box { lower, upper } => {
                if !lower.is_finite() || !upper.is_finite() {
                    return Err(SetupError::InvalidCone(format!(
                        "box bounds must be finite, got [{}, {}]",
                        lower, upper
                    )));
                }
                if lower > upper {
                    return Err(SetupError::InvalidCone(format!(
                        "box lower bound {} exceeds upper bound {}",
                        lower, upper
                    )));
                }
                Ok(())
            }
        }
    }

    /// Euclidean projection onto the set, in place.
    ///
    /// Assumes [`ConeSpec::validate`] has passed.
    pub fn project(&self, v: &mut DVector<f64>) {
        match *self {
            Self::Free => {}
            Self::NonNegative => v.iter_mut().for_each(|x| *x = x.max(0.0)),
            Self::Box { lower, upper } => v.iter_mut().for_each(|x| *x = x.clamp(lower, upper)),
        }
    }

    pub fn contains(&self, v: &DVector<f64>, tolerance: f64) -> bool {
        match *self {
            Self::Free => true,
            Self::NonNegative => v.iter().all(|&x| x >= -tolerance),
            Self::Box { lower, upper } => v
                .iter()
                .all(|&x| x >= lower - tolerance && x <= upper + tolerance),
        }
    }

    fn is_transportable(&self) -> bool {
        match *self {
            Self::Free | Self::NonNegative => true,
            Self::Box { lower, upper } => lower.is_finite() && upper.is_finite(),
        }
    }
}

/// An immutable description of one instance of
/// `minimize ½‖Ax − b‖²  subject to  x ∈ C`.
///
/// Specs are shared read-only between workers (usually behind an `Arc`); nothing in the
/// crate mutates one after construction. Structural validity is checked lazily by
/// [`ProblemSpec::validate`], which the solver setup phase calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSpec {
    a: DMatrix<f64>,
    b: DVector<f64>,
    cone: ConeSpec,
}

impl ProblemSpec {
    pub fn new(a: DMatrix<f64>, b: DVector<f64>, cone: ConeSpec) -> Self {
        Self { a, b, cone }
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    pub fn cone(&self) -> ConeSpec {
        self.cone
    }

    pub fn rows(&self) -> usize {
        self.a.nrows()
    }

    pub fn cols(&self) -> usize {
        self.a.ncols()
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        let (rows, cols) = self.a.shape();
        if rows == 0 || cols == 0 {
            return Err(SetupError::EmptyProblem { rows, cols });
        }
        if self.b.len() != rows {
            return Err(SetupError::DimensionMismatch {
                rows,
                cols,
                rhs: self.b.len(),
            });
        }
        if !self.a.iter().all(|v| v.is_finite()) {
            return Err(SetupError::NonFiniteData {
                field: "A".to_string(),
            });
        }
        if !self.b.iter().all(|v| v.is_finite()) {
            return Err(SetupError::NonFiniteData {
                field: "b".to_string(),
            });
        }
        self.cone.validate()
    }

    /// Whether every number in the spec survives a JSON round trip.
    pub fn is_transportable(&self) -> bool {
        self.a.iter().all(|v| v.is_finite())
            && self.b.iter().all(|v| v.is_finite())
            && self.cone.is_transportable()
    }
}
