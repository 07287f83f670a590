//! Blocking dequeue on top of a non-blocking claim.
//!
//! A [`Poller`] retries a claim attempt on a fixed interval and is woken early
//! whenever the shared [`Notifier`] is raised by an enqueue. Waiting ends at a
//! deadline or on cancellation; either way the attempt that gets abandoned is a
//! pending wait, never a store write.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{futures::Notified, Notify},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wake signal shared by every handle on a queue. Raising it never blocks, and a
/// signal nobody is waiting for is dropped.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    notify: Arc<Notify>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_waiters();
    }

    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    notifier: Notifier,
}

impl Poller {
    pub fn new(interval: Duration, notifier: Notifier) -> Self {
        Self { interval, notifier }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Runs `attempt` until it yields a value, `deadline` passes, or `cancel` fires.
    ///
    /// Returns `Ok(None)` on timeout or cancellation. Errors from `attempt` end the
    /// loop immediately.
    pub async fn poll<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        mut attempt: F,
    ) -> Result<Option<T>, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, Error>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            // Register for the wake signal before looking, so an enqueue that lands
            // between the attempt and the wait is not missed.
            let notified = self.notifier.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = attempt().await? {
                return Ok(Some(found));
            }

            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::trace!("poll cancelled");
                    return Ok(None);
                }
                _ = expired => {
                    tracing::trace!("poll deadline reached");
                    return Ok(None);
                }
                _ = &mut notified => tracing::trace!("woken by enqueue"),
                _ = tokio::time::sleep(self.interval) => tracing::trace!("poll interval elapsed"),
            }
        }
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, Notifier::new())
    }
}
