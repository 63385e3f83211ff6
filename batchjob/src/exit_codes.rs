//! Stable exit codes for the `batchjob` binary.

/// The job succeeded.
pub const SUCCEEDED: i32 = 0;
/// The job failed, or the watch was aborted before a terminal outcome.
pub const FAILED: i32 = 1;
/// Pre-flight validation, configuration, or submission failed.
pub const INVALID: i32 = 1;
