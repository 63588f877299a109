//! # Engine Module
//!
//! The stateful layer: reusable solver workspaces and the machinery that spreads batches
//! of tasks across workers.
//!
//! ## Overview
//!
//! A [`workspace::Workspace`] owns the factorization derived from one problem and can be
//! solved against repeatedly. Work is described as [`task::TaskPayload`] values, handed
//! to the [`dispatcher::Dispatcher`], and executed by one of the
//! [`backend::ExecutionBackend`] implementations. Outcomes come back in submission order
//! regardless of which worker finished first.
//!
//! ## Architecture
//!
//! - **Workspace** ([`workspace`]) - Lifecycle state machine around a prepared solver state
//! - **Tasks** ([`task`]) - Payloads, indexed tasks, outputs and outcomes
//! - **Backends** ([`backend`]) - Sequential, shared-thread and isolated-process execution
//! - **Worker Protocol** ([`worker`]) - JSON request/reply exchanged with child processes
//! - **Dispatch** ([`dispatcher`]) - Ordering, fail-fast cancellation and streaming callbacks
//! - **Collection** ([`collector`]) - Outcome counts and timing aggregates
//! - **Configuration** ([`config`]) - Backend choice, worker count and error policy
//! - **Progress Monitoring** ([`progress`]) - Progress events and the shared reporter
//! - **Error Handling** ([`error`]) - Task, transport, backend and dispatch errors
//!
//! ## Sharing rules
//!
//! Problem specs are immutable and shared behind `Arc`. A workspace is owned by exactly one
//! task at a time; the shared-thread backend moves it into the worker and back out with
//! the result. The isolated-process backend cannot carry one at all and rejects such
//! batches up front.

pub mod backend;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod progress;
pub mod task;
pub mod worker;
pub mod workspace;
