//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config/layout, a failed stage, or any other error.
pub const INVALID: i32 = 1;
/// `orchestrator run` left the job halted in STOP.
pub const HALTED: i32 = 2;
/// `orchestrator run` found or left the job terminally FAILED.
pub const FAILED: i32 = 3;
/// `orchestrator loop` ran out of steps before the goal was met.
pub const MAX_STEPS: i32 = 4;
