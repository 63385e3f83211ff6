//! Deterministic, pure logic shared by the job lifecycle.
//!
//! Core modules must be free of I/O side effects. They operate on job
//! snapshots already received from the cluster and return deterministic
//! classifications suitable for tests.

pub mod classifier;
pub mod namespace;
pub mod types;
