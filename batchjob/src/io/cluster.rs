//! Cluster abstraction for job submission, watching, and cleanup.
//!
//! The [`Cluster`] trait decouples the lifecycle controller from the actual
//! cluster client (currently `kube`, see [`crate::io::kube_cluster`]). Tests use a
//! scripted cluster that records calls without any network access.

use std::fmt;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::{AsyncBufRead, Stream};
use k8s_openapi::api::batch::v1::Job;

use crate::core::types::JobEvent;

/// Label the job controller puts on every pod it creates.
pub const JOB_NAME_LABEL: &str = "job-name";

/// Stream of watch events for one job.
///
/// An `Err` item is a transport-level failure; the stream ending means the
/// subscription was closed.
pub type JobEventStream = Pin<Box<dyn Stream<Item = Result<JobEvent>> + Send>>;

/// Raw byte stream of one pod's log, as sent by the cluster.
pub type PodLogReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// One pod launched by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
}

impl fmt::Display for PodRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Label selector matching the pods of `job_name`.
pub fn job_pod_selector(job_name: &str) -> String {
    format!("{JOB_NAME_LABEL}={job_name}")
}

/// Operations the job lifecycle needs from a cluster client.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Namespace jobs are submitted to and looked up in.
    fn namespace(&self) -> &str;

    /// Submit the job. Returns the object as created by the cluster.
    async fn create_job(&self, spec: &Job) -> Result<Job>;

    /// Open a watch on the named job.
    async fn watch_job(&self, name: &str) -> Result<JobEventStream>;

    /// List the pods selected by `job-name=<name>`.
    async fn list_job_pods(&self, name: &str) -> Result<Vec<PodRecord>>;

    /// Open a stream of the pod's complete log. Bytes are passed through
    /// undecoded.
    async fn pod_log(&self, pod: &PodRecord) -> Result<PodLogReader>;

    /// Delete the named job and its pods.
    async fn delete_job(&self, name: &str) -> Result<()>;

    /// Close the client connection. Later calls must fail.
    async fn close(&self) -> Result<()>;
}
