//! I/O helpers: configuration, scaffolding and agent execution.

pub mod agent;
pub mod config;
pub mod executor;
pub mod init;
pub mod process;
pub mod prompt;
