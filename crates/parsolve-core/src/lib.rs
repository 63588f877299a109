//! # parsolve
//!
//! Parallel execution of batches of two-phase numerical solves: an expensive one-time
//! setup (a matrix factorization) that can be amortized, followed by cheap solves that
//! reuse it.
//!
//! ## Architectural Philosophy
//!
//! - **[`core`]: The Foundation.** Stateless problem descriptions, a deterministic problem
//!   source, and the [`SolverEngine`](core::solver::SolverEngine) contract with its
//!   bundled ADMM implementation for cone-constrained least squares.
//!
//! - **[`engine`]: The Execution Layer.** Reusable workspaces with an explicit lifecycle,
//!   and the dispatcher that spreads tasks over sequential, shared-thread or
//!   isolated-process backends while keeping results in submission order.
//!
//! - **[`workflows`]: The Public API.** Generate-dispatch-collect in one call, amortized
//!   construct-then-solve, and cross-backend comparison.

pub mod core;
pub mod engine;
pub mod workflows;

/// Version of this library, as recorded in its package manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
