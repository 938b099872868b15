//! Deterministic, pure logic shared by the engine and the workflow.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod error;
pub mod gating;
pub mod nodes;
pub mod records;
pub mod shape;
pub mod types;
