//! Stable exit codes for planloop CLI commands.

/// Command succeeded; for `run`, every task ended done or blocked.
pub const OK: i32 = 0;
/// Command failed due to invalid plan/config or an unrecoverable error.
pub const INVALID: i32 = 1;
/// `run` found nothing actionable (empty plan or nothing selectable).
pub const NOTHING_TO_DO: i32 = 2;
/// `run` stopped because an abort was requested.
pub const ABORTED: i32 = 3;
