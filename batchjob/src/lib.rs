//! Run one Kubernetes batch job to completion with log-complete semantics.
//!
//! The crate submits a Job, watches it until it succeeds or fails, saves the
//! log of every pod it produced, deletes it, and reports an exit code that
//! mirrors its outcome. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (event classification, namespace
//!   resolution). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (cluster access, spec and config
//!   files, log artifacts). The cluster sits behind the
//!   [`io::cluster::Cluster`] trait so tests can script it.
//!
//! [`watcher`] turns the event stream into one terminal notification and
//! [`lifecycle`] reacts to it with the cleanup sequence.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod subscription;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watcher;
