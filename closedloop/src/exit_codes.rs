//! Stable exit codes for closedloop CLI commands.

/// Command succeeded or the run completed.
pub const OK: i32 = 0;
/// Command failed due to invalid input/config or other errors.
pub const INVALID: i32 = 1;
/// The run is waiting for the user or paused.
pub const WAITING: i32 = 2;
/// The run ended blocked, failed, or cancelled.
pub const HALTED: i32 = 3;
/// No run exists with the given id.
pub const NOT_FOUND: i32 = 4;
