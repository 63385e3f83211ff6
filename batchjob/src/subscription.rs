//! Close handle for a job watch stream.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use anyhow::{Result, anyhow, bail};
use futures::Stream;
use tracing::info;

use crate::core::types::JobEvent;
use crate::io::cluster::JobEventStream;

type Slot = Arc<Mutex<Option<JobEventStream>>>;

/// Live watch on one job.
///
/// [`WatchSubscription::open`] splits a raw event stream into the stream the
/// watcher drains and this handle. Closing the handle drops the underlying
/// watch right away, releasing its connection, and the watcher's stream ends
/// at its next poll. A subscription may be closed only once.
pub struct WatchSubscription {
    job: String,
    slot: Slot,
    closed: bool,
}

/// Watcher side of a [`WatchSubscription`].
struct SubscribedEvents {
    slot: Slot,
}

impl Stream for SubscribedEvents {
    type Item = Result<JobEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Ok(mut slot) = self.slot.lock() else {
            return Poll::Ready(None);
        };
        match slot.as_mut() {
            Some(events) => events.as_mut().poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl WatchSubscription {
    pub fn open(job: &str, events: JobEventStream) -> (Self, JobEventStream) {
        let slot: Slot = Arc::new(Mutex::new(Some(events)));
        let subscription = Self {
            job: job.to_string(),
            slot: Arc::clone(&slot),
            closed: false,
        };
        (subscription, Box::pin(SubscribedEvents { slot }))
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop delivery of further events and drop the underlying watch.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            bail!("watch on job {} already closed", self.job);
        }
        info!(job = %self.job, "closing watcher");
        let events = self
            .slot
            .lock()
            .map_err(|_| anyhow!("watch on job {} poisoned", self.job))?
            .take();
        self.closed = true;
        drop(events);
        info!(job = %self.job, "watcher closed");
        Ok(())
    }
}
