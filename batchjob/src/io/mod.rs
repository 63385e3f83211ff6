//! I/O helpers for the job lifecycle.

pub mod cluster;
pub mod config;
pub mod kube_cluster;
pub mod pod_logs;
pub mod spec;
