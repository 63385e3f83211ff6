//! Test-only helpers: job snapshots and a scripted in-memory cluster.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use futures::io::Cursor;
use futures::stream;
use futures::{Stream, StreamExt};
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::core::types::{JobEvent, WatchAction};
use crate::io::cluster::{Cluster, JobEventStream, PodLogReader, PodRecord};

/// Create a job snapshot with the given status counters.
pub fn job_snapshot(
    name: &str,
    active: Option<i32>,
    succeeded: Option<i32>,
    failed: Option<i32>,
) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        status: Some(JobStatus {
            active,
            succeeded,
            failed,
            ..JobStatus::default()
        }),
        ..Job::default()
    }
}

pub fn job_event(action: WatchAction, job: Job) -> JobEvent {
    JobEvent::new(action, job)
}

/// `MODIFIED` event with `active` running pods.
pub fn active(name: &str, active: i32) -> JobEvent {
    job_event(
        WatchAction::Modified,
        job_snapshot(name, Some(active), None, None),
    )
}

/// `MODIFIED` event with `succeeded` completed pods.
pub fn succeeded(name: &str, succeeded: i32) -> JobEvent {
    job_event(
        WatchAction::Modified,
        job_snapshot(name, None, Some(succeeded), None),
    )
}

/// `MODIFIED` event with `failed` failed pods.
pub fn failed(name: &str, failed: i32) -> JobEvent {
    job_event(
        WatchAction::Modified,
        job_snapshot(name, None, None, Some(failed)),
    )
}

/// A minimal submittable job manifest.
pub fn job_spec(name: &str) -> Job {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": name },
        "spec": {
            "backoffLimit": 0,
            "template": {
                "spec": {
                    "containers": [{ "name": "main", "image": "alpine:latest" }],
                    "restartPolicy": "Never",
                }
            }
        }
    }))
    .expect("valid job manifest")
}

/// Call recorded by [`FakeCluster`], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    CreateJob(String),
    WatchJob(String),
    /// The watch stream opened for the job was dropped.
    WatchClosed(String),
    ListPods(String),
    PodLogs(String),
    DeleteJob(String),
    Close,
}

#[derive(Debug)]
enum ScriptedItem {
    Event(JobEvent),
    TransportError(String),
}

/// Scripted cluster: returns canned pods, logs, and watch events.
///
/// Unless [`FakeCluster::ending_stream`] is used, the watch stream stays open
/// after the scripted events, like a real watch, until the subscription is
/// closed.
pub struct FakeCluster {
    namespace: String,
    pods: Vec<(PodRecord, std::result::Result<Vec<u8>, String>)>,
    script: Mutex<Vec<ScriptedItem>>,
    end_stream: bool,
    reject_create: Option<String>,
    fail_watch: Option<String>,
    fail_list: Option<String>,
    fail_delete: Option<String>,
    calls: Arc<Mutex<Vec<ClusterCall>>>,
    closed: AtomicBool,
}

impl FakeCluster {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            pods: Vec::new(),
            script: Mutex::new(Vec::new()),
            end_stream: false,
            reject_create: None,
            fail_watch: None,
            fail_list: None,
            fail_delete: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_pod_log(mut self, pod: &str, log: &[u8]) -> Self {
        let record = self.pod_record(pod);
        self.pods.push((record, Ok(log.to_vec())));
        self
    }

    pub fn with_failing_pod_log(mut self, pod: &str, error: &str) -> Self {
        let record = self.pod_record(pod);
        self.pods.push((record, Err(error.to_string())));
        self
    }

    pub fn with_events(self, events: Vec<JobEvent>) -> Self {
        {
            let mut script = self.script.lock().expect("script lock");
            script.extend(events.into_iter().map(ScriptedItem::Event));
        }
        self
    }

    pub fn with_transport_error(self, error: &str) -> Self {
        {
            let mut script = self.script.lock().expect("script lock");
            script.push(ScriptedItem::TransportError(error.to_string()));
        }
        self
    }

    /// End the watch stream after the scripted events.
    pub fn ending_stream(mut self) -> Self {
        self.end_stream = true;
        self
    }

    pub fn rejecting_create(mut self, error: &str) -> Self {
        self.reject_create = Some(error.to_string());
        self
    }

    pub fn failing_watch(mut self, error: &str) -> Self {
        self.fail_watch = Some(error.to_string());
        self
    }

    pub fn failing_list(mut self, error: &str) -> Self {
        self.fail_list = Some(error.to_string());
        self
    }

    pub fn failing_delete(mut self, error: &str) -> Self {
        self.fail_delete = Some(error.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pod_record(&self, pod: &str) -> PodRecord {
        PodRecord {
            name: pod.to_string(),
            namespace: self.namespace.clone(),
        }
    }

    fn record(&self, call: ClusterCall) -> Result<()> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("calls lock poisoned"))?
            .push(call);
        if self.is_closed() {
            bail!("cluster connection already closed");
        }
        Ok(())
    }
}

/// Watch stream that records [`ClusterCall::WatchClosed`] when dropped.
struct RecordedWatch {
    job: String,
    events: JobEventStream,
    calls: Arc<Mutex<Vec<ClusterCall>>>,
}

impl Stream for RecordedWatch {
    type Item = Result<JobEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl Drop for RecordedWatch {
    fn drop(&mut self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ClusterCall::WatchClosed(self.job.clone()));
        }
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create_job(&self, spec: &Job) -> Result<Job> {
        let name = spec.metadata.name.clone().unwrap_or_else(|| {
            format!(
                "{}x7k2q",
                spec.metadata.generate_name.clone().unwrap_or_default()
            )
        });
        self.record(ClusterCall::CreateJob(name.clone()))?;
        if let Some(error) = &self.reject_create {
            bail!("{error}");
        }
        let mut created = spec.clone();
        created.metadata.name = Some(name);
        created.metadata.namespace = Some(self.namespace.clone());
        Ok(created)
    }

    async fn watch_job(&self, name: &str) -> Result<JobEventStream> {
        self.record(ClusterCall::WatchJob(name.to_string()))?;
        if let Some(error) = &self.fail_watch {
            bail!("{error}");
        }
        let script = std::mem::take(
            &mut *self
                .script
                .lock()
                .map_err(|_| anyhow!("script lock poisoned"))?,
        );
        let items = stream::iter(script.into_iter().map(|item| match item {
            ScriptedItem::Event(event) => Ok(event),
            ScriptedItem::TransportError(error) => Err(anyhow!(error)),
        }));
        let events: JobEventStream = if self.end_stream {
            Box::pin(items)
        } else {
            Box::pin(items.chain(stream::pending()))
        };
        Ok(Box::pin(RecordedWatch {
            job: name.to_string(),
            events,
            calls: Arc::clone(&self.calls),
        }))
    }

    async fn list_job_pods(&self, name: &str) -> Result<Vec<PodRecord>> {
        self.record(ClusterCall::ListPods(name.to_string()))?;
        if let Some(error) = &self.fail_list {
            bail!("{error}");
        }
        Ok(self.pods.iter().map(|(pod, _)| pod.clone()).collect())
    }

    async fn pod_log(&self, pod: &PodRecord) -> Result<PodLogReader> {
        self.record(ClusterCall::PodLogs(pod.name.clone()))?;
        match self.pods.iter().find(|(record, _)| record == pod) {
            Some((_, Ok(log))) => Ok(Box::pin(Cursor::new(log.clone()))),
            Some((_, Err(error))) => Err(anyhow!("{error}")),
            None => Err(anyhow!("pod {pod} not found")),
        }
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        self.record(ClusterCall::DeleteJob(name.to_string()))?;
        if let Some(error) = &self.fail_delete {
            bail!("{error}");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(ClusterCall::Close)?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
