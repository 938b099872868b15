//! Stable exit codes for sprintflow CLI commands.

/// Command succeeded; for `run`, the project was declared complete.
pub const OK: i32 = 0;
/// Command failed due to invalid config, run identity, store contents or a step failure.
pub const INVALID: i32 = 1;
/// `sprintflow run` stopped at `max_sprints` without the project being complete.
pub const INCOMPLETE: i32 = 2;
