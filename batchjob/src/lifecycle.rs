//! Submit → watch → react → teardown for exactly one job.
//!
//! [`JobLifecycle::submit_and_watch`] creates the job, opens a watch on it,
//! and spawns the delivery task that runs the [`JobWatcher`]. The watcher's
//! terminal callback is [`Teardown`], which performs the cleanup sequence
//!
//! 1. capture the log of every pod of the job,
//! 2. delete the job,
//! 3. close the watch subscription,
//! 4. close the cluster connection,
//!
//! each step best-effort, and then publishes a [`Completion`] on a one-shot
//! channel. The caller awaits it with [`WatchedJob::wait`] and decides how to
//! exit; nothing in here terminates the process.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error, Result, anyhow};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::core::types::JobOutcome;
use crate::exit_codes;
use crate::io::cluster::{Cluster, JobEventStream};
use crate::io::config::ClosePolicy;
use crate::io::pod_logs::{PodLogResult, capture_job_logs};
use crate::subscription::WatchSubscription;
use crate::watcher::{JobWatcher, TerminalHandler, WatchEnd};

/// Settings for one lifecycle run.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Directory the pod log artifacts are written to. Must exist.
    pub log_dir: PathBuf,
    /// Deadline for the whole watch.
    pub watch_timeout: Option<Duration>,
    pub on_watch_close: ClosePolicy,
}

/// Why a watch ended without a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    WatchClosed,
    DeadlineExceeded,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::WatchClosed => f.write_str("watch closed before a terminal outcome"),
            AbortReason::DeadlineExceeded => f.write_str("watch deadline exceeded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Finished(JobOutcome),
    Aborted(AbortReason),
}

/// Cleanup steps in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    CaptureLogs,
    DeleteJob,
    CloseWatch,
    CloseClient,
}

/// A cleanup step that failed; later steps still ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: TeardownStep,
    pub error: String,
}

/// What the cleanup sequence did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub job: String,
    pub pod_logs: Vec<PodLogResult>,
    /// Steps attempted, in order.
    pub steps: Vec<TeardownStep>,
    pub failures: Vec<StepFailure>,
}

impl TeardownReport {
    fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            ..Self::default()
        }
    }

    fn record_failure(&mut self, step: TeardownStep, err: &Error) {
        let message = format!("{err:#}");
        error!(job = %self.job, step = ?step, err = %message, "teardown step failed");
        self.failures.push(StepFailure {
            step,
            error: message,
        });
    }

    pub fn logs_written(&self) -> usize {
        self.pod_logs.iter().filter(|result| result.is_written()).count()
    }
}

/// Final result of a lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub disposition: Disposition,
    pub report: TeardownReport,
}

impl Completion {
    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        match self.disposition {
            Disposition::Finished(outcome) => outcome.status_code(),
            Disposition::Aborted(_) => exit_codes::FAILED,
        }
    }
}

/// Controller for one job per process.
pub struct JobLifecycle<C> {
    cluster: Arc<C>,
    config: LifecycleConfig,
}

impl<C: Cluster + 'static> JobLifecycle<C> {
    pub fn new(cluster: Arc<C>, config: LifecycleConfig) -> Self {
        Self { cluster, config }
    }

    /// Submit `spec` and start watching the created job.
    ///
    /// Returns once the watch is established. A rejected submission is
    /// returned as an error with nothing to clean up. If the watch cannot be
    /// opened, the just-created job is deleted before the error is returned.
    #[instrument(skip_all, fields(namespace = %self.cluster.namespace()))]
    pub async fn submit_and_watch(&self, spec: &Job) -> Result<WatchedJob> {
        let created = self
            .cluster
            .create_job(spec)
            .await
            .context("submit job")?;
        let name = created.name_any();
        info!(job = %name, "job submitted");

        let events = match self.cluster.watch_job(&name).await {
            Ok(events) => events,
            Err(err) => {
                if let Err(delete_err) = self.cluster.delete_job(&name).await {
                    warn!(job = %name, err = %format!("{delete_err:#}"), "could not delete unwatched job");
                }
                return Err(err.context(format!("watch job {name}")));
            }
        };
        let (subscription, events) = WatchSubscription::open(&name, events);

        let (completion_tx, completion_rx) = oneshot::channel();
        let teardown = Teardown {
            cluster: Arc::clone(&self.cluster),
            job: name.clone(),
            log_dir: self.config.log_dir.clone(),
            subscription: Some(subscription),
            completion: Some(completion_tx),
        };
        let deadline = self.config.watch_timeout.map(|timeout| Instant::now() + timeout);
        let task = tokio::spawn(deliver(
            JobWatcher::new(teardown),
            events,
            deadline,
            self.config.on_watch_close,
        ));
        info!(job = %name, "watching job");

        Ok(WatchedJob {
            job: created,
            completion: completion_rx,
            task,
        })
    }
}

/// A submitted job whose watch is running on a background task.
pub struct WatchedJob {
    job: Job,
    completion: oneshot::Receiver<Completion>,
    task: JoinHandle<()>,
}

impl WatchedJob {
    /// The job as created by the cluster.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Wait for the cleanup sequence to finish.
    pub async fn wait(self) -> Result<Completion> {
        let completion = self
            .completion
            .await
            .map_err(|_| anyhow!("job watch task ended without a result"))?;
        if let Err(err) = self.task.await {
            warn!(err = %err, "job watch task did not finish cleanly");
        }
        Ok(completion)
    }
}

/// Delivery task: runs the watcher, then applies the close policy.
async fn deliver<C: Cluster + 'static>(
    mut watcher: JobWatcher<Teardown<C>>,
    events: JobEventStream,
    deadline: Option<Instant>,
    policy: ClosePolicy,
) {
    let reason = match watcher.run(events, deadline).await {
        WatchEnd::Terminal(_) => return,
        WatchEnd::DeadlineExceeded => AbortReason::DeadlineExceeded,
        WatchEnd::Closed => match (policy, deadline) {
            (ClosePolicy::Fail, _) => AbortReason::WatchClosed,
            (ClosePolicy::Ignore, Some(deadline)) => {
                warn!("ignoring closed job watch until the deadline");
                tokio::time::sleep_until(deadline).await;
                AbortReason::DeadlineExceeded
            }
            (ClosePolicy::Ignore, None) => {
                warn!("ignoring closed job watch; waiting without a deadline");
                std::future::pending::<()>().await;
                return;
            }
        },
    };
    watcher.into_handler().abort(reason).await;
}

/// Terminal callback: the cleanup sequence for one job.
struct Teardown<C> {
    cluster: Arc<C>,
    job: String,
    log_dir: PathBuf,
    subscription: Option<WatchSubscription>,
    completion: Option<oneshot::Sender<Completion>>,
}

impl<C: Cluster> Teardown<C> {
    async fn abort(mut self, reason: AbortReason) {
        error!(job = %self.job, reason = %reason, "aborting job watch");
        self.run(Disposition::Aborted(reason)).await;
    }

    async fn run(&mut self, disposition: Disposition) {
        let mut report = TeardownReport::new(&self.job);

        report.steps.push(TeardownStep::CaptureLogs);
        match capture_job_logs(self.cluster.as_ref(), &self.job, &self.log_dir).await {
            Ok(results) => report.pod_logs = results,
            Err(err) => report.record_failure(TeardownStep::CaptureLogs, &err),
        }

        report.steps.push(TeardownStep::DeleteJob);
        info!(job = %self.job, "deleting job");
        match self.cluster.delete_job(&self.job).await {
            Ok(()) => info!(job = %self.job, "job deleted"),
            Err(err) => report.record_failure(TeardownStep::DeleteJob, &err),
        }

        report.steps.push(TeardownStep::CloseWatch);
        let closed = match self.subscription.as_mut() {
            Some(subscription) => subscription.close(),
            None => Err(anyhow!("no watch subscription to close")),
        };
        if let Err(err) = closed {
            report.record_failure(TeardownStep::CloseWatch, &err);
        }

        report.steps.push(TeardownStep::CloseClient);
        info!("disconnecting from cluster");
        match self.cluster.close().await {
            Ok(()) => info!("connection closed"),
            Err(err) => report.record_failure(TeardownStep::CloseClient, &err),
        }

        let completion = Completion {
            disposition,
            report,
        };
        info!(
            job = %self.job,
            exit_code = completion.exit_code(),
            logs_written = completion.report.logs_written(),
            failures = completion.report.failures.len(),
            "job lifecycle finished"
        );
        match self.completion.take() {
            Some(sender) => {
                if sender.send(completion).is_err() {
                    warn!(job = %self.job, "completion receiver dropped");
                }
            }
            None => warn!(job = %self.job, "completion already published"),
        }
    }
}

#[async_trait]
impl<C: Cluster + 'static> TerminalHandler for Teardown<C> {
    async fn on_terminal(&mut self, outcome: JobOutcome, job: &Job) {
        info!(job = %job.name_any(), outcome = %outcome, "job reached terminal state");
        self.run(Disposition::Finished(outcome)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ClusterCall, FakeCluster, active, failed, job_spec, succeeded};

    fn config(log_dir: &std::path::Path) -> LifecycleConfig {
        LifecycleConfig {
            log_dir: log_dir.to_path_buf(),
            watch_timeout: None,
            on_watch_close: ClosePolicy::Fail,
        }
    }

    async fn run_to_completion(cluster: Arc<FakeCluster>, config: LifecycleConfig) -> Completion {
        let lifecycle = JobLifecycle::new(Arc::clone(&cluster), config);
        let watched = lifecycle
            .submit_and_watch(&job_spec("batch-1"))
            .await
            .expect("submit");
        watched.wait().await.expect("completion")
    }

    #[tokio::test]
    async fn success_runs_full_teardown_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cluster = Arc::new(
            FakeCluster::new("ci")
                .with_pod_log("batch-1-abc", b"abc\n")
                .with_events(vec![active("batch-1", 1), succeeded("batch-1", 1)]),
        );

        let completion = run_to_completion(Arc::clone(&cluster), config(temp.path())).await;

        assert_eq!(completion.exit_code(), 0);
        assert_eq!(
            completion.report.steps,
            vec![
                TeardownStep::CaptureLogs,
                TeardownStep::DeleteJob,
                TeardownStep::CloseWatch,
                TeardownStep::CloseClient,
            ]
        );
        assert!(completion.report.failures.is_empty());
        assert_eq!(
            cluster.calls(),
            vec![
                ClusterCall::CreateJob("batch-1".to_string()),
                ClusterCall::WatchJob("batch-1".to_string()),
                ClusterCall::ListPods("batch-1".to_string()),
                ClusterCall::PodLogs("batch-1-abc".to_string()),
                ClusterCall::DeleteJob("batch-1".to_string()),
                ClusterCall::WatchClosed("batch-1".to_string()),
                ClusterCall::Close,
            ]
        );
    }

    #[tokio::test]
    async fn failure_maps_to_exit_code_one() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cluster = Arc::new(
            FakeCluster::new("ci")
                .with_pod_log("batch-1-abc", b"boom\n")
                .with_events(vec![active("batch-1", 1), failed("batch-1", 1)]),
        );

        let completion = run_to_completion(Arc::clone(&cluster), config(temp.path())).await;

        assert_eq!(
            completion.disposition,
            Disposition::Finished(JobOutcome::Failed)
        );
        assert_eq!(completion.exit_code(), 1);
        assert!(cluster.calls().contains(&ClusterCall::DeleteJob("batch-1".to_string())));
    }

    #[tokio::test]
    async fn cleanup_failures_do_not_stop_later_steps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cluster = Arc::new(
            FakeCluster::new("ci")
                .failing_list("pods forbidden")
                .failing_delete("jobs forbidden")
                .with_events(vec![succeeded("batch-1", 1)]),
        );

        let completion = run_to_completion(Arc::clone(&cluster), config(temp.path())).await;

        assert_eq!(completion.exit_code(), 0);
        let failed_steps: Vec<TeardownStep> = completion
            .report
            .failures
            .iter()
            .map(|failure| failure.step)
            .collect();
        assert_eq!(
            failed_steps,
            vec![TeardownStep::CaptureLogs, TeardownStep::DeleteJob]
        );
        assert!(cluster.is_closed());
    }

    #[tokio::test]
    async fn rejected_submission_makes_no_other_calls() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cluster = Arc::new(FakeCluster::new("ci").rejecting_create("forbidden"));
        let lifecycle = JobLifecycle::new(Arc::clone(&cluster), config(temp.path()));

        let err = lifecycle
            .submit_and_watch(&job_spec("batch-1"))
            .await
            .err()
            .expect("submission should fail");

        assert!(format!("{err:#}").contains("forbidden"));
        assert_eq!(
            cluster.calls(),
            vec![ClusterCall::CreateJob("batch-1".to_string())]
        );
    }

    #[tokio::test]
    async fn failed_watch_deletes_the_created_job() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cluster = Arc::new(FakeCluster::new("ci").failing_watch("watch refused"));
        let lifecycle = JobLifecycle::new(Arc::clone(&cluster), config(temp.path()));

        let result = lifecycle.submit_and_watch(&job_spec("batch-1")).await;

        assert!(result.is_err());
        assert_eq!(
            cluster.calls().last(),
            Some(&ClusterCall::DeleteJob("batch-1".to_string()))
        );
    }

    #[tokio::test]
    async fn closed_stream_aborts_under_fail_policy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cluster = Arc::new(
            FakeCluster::new("ci")
                .with_pod_log("batch-1-abc", b"partial\n")
                .with_events(vec![active("batch-1", 1)])
                .with_transport_error("connection reset")
                .ending_stream(),
        );

        let completion = run_to_completion(Arc::clone(&cluster), config(temp.path())).await;

        assert_eq!(
            completion.disposition,
            Disposition::Aborted(AbortReason::WatchClosed)
        );
        assert_eq!(completion.exit_code(), 1);
        assert_eq!(completion.report.logs_written(), 1);
        assert!(cluster.calls().contains(&ClusterCall::DeleteJob("batch-1".to_string())));
        assert!(cluster.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_under_ignore_policy_waits_for_deadline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cluster = Arc::new(
            FakeCluster::new("ci")
                .with_events(vec![active("batch-1", 1)])
                .ending_stream(),
        );
        let config = LifecycleConfig {
            watch_timeout: Some(Duration::from_secs(60)),
            on_watch_close: ClosePolicy::Ignore,
            ..config(temp.path())
        };

        let completion = run_to_completion(Arc::clone(&cluster), config).await;

        assert_eq!(
            completion.disposition,
            Disposition::Aborted(AbortReason::DeadlineExceeded)
        );
        assert_eq!(completion.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_a_job_that_never_finishes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cluster = Arc::new(FakeCluster::new("ci").with_events(vec![active("batch-1", 1)]));
        let config = LifecycleConfig {
            watch_timeout: Some(Duration::from_secs(60)),
            ..config(temp.path())
        };

        let completion = run_to_completion(Arc::clone(&cluster), config).await;

        assert_eq!(
            completion.disposition,
            Disposition::Aborted(AbortReason::DeadlineExceeded)
        );
        assert_eq!(
            completion.report.steps.last(),
            Some(&TeardownStep::CloseClient)
        );
        assert!(cluster.calls().contains(&ClusterCall::DeleteJob("batch-1".to_string())));
    }
}
