//! # Core Module
//!
//! Stateless foundation of the library: problem descriptions, a deterministic problem
//! source, and the numerical solver engine.
//!
//! ## Architecture
//!
//! - **Problem Model** ([`problem`]) - Immutable `ProblemSpec` and its `ConeSpec` constraint set
//! - **Problem Generation** ([`generate`]) - Seeded random instances behind the `ProblemSource` trait
//! - **Numerical Engine** ([`solver`]) - The two-phase `SolverEngine` contract, settings,
//!   results, and the bundled ADMM implementation
//!
//! Nothing in this layer knows about workers, backends, or scheduling; that lives in
//! [`crate::engine`].

pub mod generate;
pub mod problem;
pub mod solver;
