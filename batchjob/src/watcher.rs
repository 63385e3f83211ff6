//! Turns the noisy job event stream into a single terminal notification.
//!
//! The watcher owns no cleanup logic. It classifies each event (see
//! [`crate::core::classifier`]) and hands the first terminal outcome to its
//! [`TerminalHandler`]. Everything the cluster sends afterwards, such as the
//! `MODIFIED`/`DELETED` events produced while the job is being deleted, is
//! dropped.

use anyhow::Error;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::core::classifier::classify;
use crate::core::types::{Classification, JobEvent, JobOutcome, StatusCounts};
use crate::io::cluster::JobEventStream;

/// Receiver of the terminal outcome of a watched job.
#[async_trait]
pub trait TerminalHandler: Send {
    /// Called at most once per watcher, with the snapshot that carried the
    /// terminal status.
    async fn on_terminal(&mut self, outcome: JobOutcome, job: &Job);
}

/// Why [`JobWatcher::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// The handler was called with this outcome.
    Terminal(JobOutcome),
    /// The stream ended before any terminal event.
    Closed,
    /// The deadline passed before any terminal event.
    DeadlineExceeded,
}

pub struct JobWatcher<H> {
    handler: H,
    terminal: Option<JobOutcome>,
    last_error: Option<String>,
}

impl<H: TerminalHandler> JobWatcher<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            terminal: None,
            last_error: None,
        }
    }

    /// Outcome already handed to the handler, if any.
    pub fn terminal(&self) -> Option<JobOutcome> {
        self.terminal
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Drain `events` until the stream ends or `deadline` passes.
    ///
    /// The deadline only bounds the wait for the next event. A handler call
    /// that is already running always completes.
    pub async fn run(&mut self, mut events: JobEventStream, deadline: Option<Instant>) -> WatchEnd {
        loop {
            let next = match deadline {
                Some(deadline) => tokio::select! {
                    next = events.next() => next,
                    _ = tokio::time::sleep_until(deadline) => {
                        if let Some(outcome) = self.terminal {
                            return WatchEnd::Terminal(outcome);
                        }
                        error!("job watch deadline exceeded before a terminal outcome");
                        return WatchEnd::DeadlineExceeded;
                    }
                },
                None => events.next().await,
            };
            match next {
                Some(Ok(event)) => {
                    self.event_received(event).await;
                }
                Some(Err(err)) => self.on_transport_error(&err),
                None => break,
            }
        }

        match self.terminal {
            Some(outcome) => WatchEnd::Terminal(outcome),
            None => {
                self.on_close();
                WatchEnd::Closed
            }
        }
    }

    /// Classify one event and fire the handler on the first terminal one.
    pub async fn event_received(&mut self, event: JobEvent) -> Classification {
        let name = event.job_name().unwrap_or_default();
        info!(job = %name, action = %event.action, "job event");

        let classification = classify(event.job.as_ref());
        let outcome = match classification {
            Classification::Ignorable => {
                debug!(job = %name, "event carries no job status");
                return classification;
            }
            Classification::Active(active) => {
                info!(job = %name, active, "job active");
                return classification;
            }
            Classification::Terminal(outcome) => outcome,
        };

        if let Some(first) = self.terminal {
            debug!(job = %name, first = %first, outcome = %outcome, "ignoring event after terminal outcome");
            return classification;
        }
        let Some(job) = event.job.as_ref() else {
            return classification;
        };

        let counts = job.status.as_ref().map(StatusCounts::from).unwrap_or_default();
        match outcome {
            JobOutcome::Succeeded => info!(job = %job.name_any(), %counts, "job succeeded"),
            JobOutcome::Failed => error!(job = %job.name_any(), %counts, "job failed"),
        }
        self.terminal = Some(outcome);
        self.handler.on_terminal(outcome, job).await;
        classification
    }

    /// Record a transport-level failure. Not a terminal outcome.
    pub fn on_transport_error(&mut self, err: &Error) {
        let message = format!("{err:#}");
        error!(err = %message, "job watch transport error");
        self.last_error = Some(message);
    }

    fn on_close(&self) {
        let cause = self.last_error.as_deref().unwrap_or("stream ended");
        error!(cause = %cause, "job watch closed before a terminal outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WatchAction;
    use crate::test_support::{job_event, job_snapshot};
    use anyhow::anyhow;
    use futures::stream;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Vec<(JobOutcome, String)>,
    }

    #[async_trait]
    impl TerminalHandler for RecordingHandler {
        async fn on_terminal(&mut self, outcome: JobOutcome, job: &Job) {
            self.calls.push((outcome, job.name_any()));
        }
    }

    fn finite(events: Vec<JobEvent>) -> JobEventStream {
        Box::pin(stream::iter(events.into_iter().map(Ok)))
    }

    async fn drive(events: Vec<JobEvent>) -> (WatchEnd, Vec<(JobOutcome, String)>) {
        let mut watcher = JobWatcher::new(RecordingHandler::default());
        let end = watcher.run(finite(events), None).await;
        (end, watcher.into_handler().calls)
    }

    #[tokio::test]
    async fn repeated_terminal_events_fire_once() {
        let (end, calls) = drive(vec![
            job_event(WatchAction::Added, job_snapshot("batch-1", Some(1), None, None)),
            job_event(WatchAction::Modified, job_snapshot("batch-1", None, Some(1), None)),
            job_event(WatchAction::Modified, job_snapshot("batch-1", None, Some(1), None)),
            job_event(WatchAction::Deleted, job_snapshot("batch-1", None, Some(1), None)),
        ])
        .await;

        assert_eq!(end, WatchEnd::Terminal(JobOutcome::Succeeded));
        assert_eq!(calls, vec![(JobOutcome::Succeeded, "batch-1".to_string())]);
    }

    #[tokio::test]
    async fn first_terminal_event_decides_outcome() {
        let sequences = vec![
            (
                vec![
                    job_snapshot("batch-1", Some(1), None, None),
                    job_snapshot("batch-1", None, None, Some(1)),
                    job_snapshot("batch-1", None, Some(1), Some(1)),
                ],
                JobOutcome::Failed,
            ),
            (
                vec![
                    job_snapshot("batch-1", Some(2), None, None),
                    job_snapshot("batch-1", Some(1), Some(1), None),
                    job_snapshot("batch-1", None, None, Some(1)),
                    job_snapshot("batch-1", Some(1), None, None),
                ],
                JobOutcome::Succeeded,
            ),
            (
                vec![
                    job_snapshot("batch-1", None, Some(1), Some(2)),
                    job_snapshot("batch-1", None, None, Some(2)),
                ],
                JobOutcome::Succeeded,
            ),
        ];

        for (snapshots, expected) in sequences {
            let events = snapshots
                .into_iter()
                .map(|job| job_event(WatchAction::Modified, job))
                .collect();
            let (end, calls) = drive(events).await;
            assert_eq!(end, WatchEnd::Terminal(expected));
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].0, expected);
        }
    }

    #[tokio::test]
    async fn ignorable_and_active_events_do_not_fire() {
        let mut no_status = job_snapshot("batch-1", None, None, None);
        no_status.status = None;
        let (end, calls) = drive(vec![
            JobEvent::without_object(WatchAction::Error),
            job_event(WatchAction::Added, no_status),
            job_event(WatchAction::Modified, job_snapshot("batch-1", None, None, None)),
            job_event(WatchAction::Modified, job_snapshot("batch-1", Some(3), None, None)),
        ])
        .await;

        assert_eq!(end, WatchEnd::Closed);
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn event_received_reports_classification() {
        let mut watcher = JobWatcher::new(RecordingHandler::default());

        let active = watcher
            .event_received(job_event(
                WatchAction::Modified,
                job_snapshot("batch-1", None, None, None),
            ))
            .await;
        assert_eq!(active, Classification::Active(0));
        assert_eq!(watcher.terminal(), None);

        let failed = watcher
            .event_received(job_event(
                WatchAction::Modified,
                job_snapshot("batch-1", None, None, Some(1)),
            ))
            .await;
        assert_eq!(failed, Classification::Terminal(JobOutcome::Failed));
        assert_eq!(watcher.terminal(), Some(JobOutcome::Failed));
        assert_eq!(watcher.handler().calls.len(), 1);
    }

    #[tokio::test]
    async fn transport_errors_are_not_terminal() {
        let events: JobEventStream = Box::pin(stream::iter(vec![
            Err(anyhow!("connection reset")),
            Ok(job_event(
                WatchAction::Modified,
                job_snapshot("batch-1", Some(1), None, None),
            )),
            Err(anyhow!("connection reset")),
            Ok(job_event(
                WatchAction::Modified,
                job_snapshot("batch-1", None, None, Some(1)),
            )),
        ]));
        let mut watcher = JobWatcher::new(RecordingHandler::default());

        let end = watcher.run(events, None).await;

        assert_eq!(end, WatchEnd::Terminal(JobOutcome::Failed));
        assert_eq!(watcher.handler().calls.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_ends_a_silent_watch() {
        let events: JobEventStream = Box::pin(
            stream::iter(vec![Ok(job_event(
                WatchAction::Added,
                job_snapshot("batch-1", Some(1), None, None),
            ))])
            .chain(stream::pending()),
        );
        let mut watcher = JobWatcher::new(RecordingHandler::default());
        let deadline = Instant::now() + Duration::from_secs(30);

        let end = watcher.run(events, Some(deadline)).await;

        assert_eq!(end, WatchEnd::DeadlineExceeded);
        assert!(watcher.handler().calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_after_terminal_keeps_the_outcome() {
        let events: JobEventStream = Box::pin(
            stream::iter(vec![Ok(job_event(
                WatchAction::Modified,
                job_snapshot("batch-1", None, Some(1), None),
            ))])
            .chain(stream::pending()),
        );
        let mut watcher = JobWatcher::new(RecordingHandler::default());
        let deadline = Instant::now() + Duration::from_secs(30);

        let end = watcher.run(events, Some(deadline)).await;

        assert_eq!(end, WatchEnd::Terminal(JobOutcome::Succeeded));
        assert_eq!(watcher.handler().calls.len(), 1);
    }
}
