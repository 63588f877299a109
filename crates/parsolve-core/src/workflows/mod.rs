//! # Workflows Module
//!
//! User-facing entry points that tie problem generation, dispatch and collection together.
//!
//! ## Architecture
//!
//! - **Batch Workflows** ([`batch`]) - Generate a batch, solve it through one backend
//!   ([`batch::run`]), construct once and solve repeatedly ([`batch::amortize`]), or run
//!   the same batch through several backends and check they agree ([`batch::compare`]).
//!
//! Every workflow reports phases through the caller's
//! [`ProgressReporter`](crate::engine::progress::ProgressReporter). Build it with
//! `.synchronized(config.verbose)` to get the ordered, serialized output that the
//! `verbose` dispatch option promises.

pub mod batch;
