use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Construction-time failure of a solver workspace. Terminal for that workspace.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum SetupError {
    #[error("Problem has no rows or columns ({rows}x{cols})")]
    EmptyProblem { rows: usize, cols: usize },

    #[error("Dimension mismatch: A is {rows}x{cols} but b has {rhs} entries")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },

    #[error("Problem data contains non-finite values in {field}")]
    NonFiniteData { field: String },

    #[error("Invalid cone descriptor: {0}")]
    InvalidCone(String),

    #[error("Invalid solver settings: {0}")]
    InvalidSettings(String),

    #[error("Factorization failed: {0}")]
    Factorization(String),
}
