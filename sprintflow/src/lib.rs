//! Resumable multi-agent sprint workflow engine.
//!
//! A workflow is a tree of steps composed by sequences, parallel groups and
//! bounded retry loops. Steps never hand data to each other directly: every
//! output is an immutable record in a [`store::RunStore`] keyed by
//! `(run, node, iteration)`, which makes any run resumable from its records.
//!
//! - **[`core`]**: Pure, deterministic logic (ids, record payloads, output
//!   shapes, gating decisions). No I/O.
//! - **[`store`]**: The append-only run store and its backends.
//! - **[`engine`]**: Node types and the interpreter.
//! - **[`io`]**: Side effects (config, agent processes, prompts).
//! - **[`workflow`]**: The sprint topology wired from the pieces above.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
