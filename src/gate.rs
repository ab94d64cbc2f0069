//! Readiness gate: pinned-verse sync only runs after the main sync has
//! written its `last_sync_at` marker.
//!
//! The main sync can wake waiters directly through [`MainSyncGate::notify_main_sync_complete`];
//! the marker is also polled so a writer in another process is still seen.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::store::LastSyncSource;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_POLLS: u32 = 20;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

#[derive(Clone)]
pub struct MainSyncGate {
    source: Arc<dyn LastSyncSource>,
    notify: Arc<Notify>,
    poll_interval: Duration,
    max_polls: u32,
}

impl std::fmt::Debug for MainSyncGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainSyncGate")
            .field("poll_interval", &self.poll_interval)
            .field("max_polls", &self.max_polls)
            .finish_non_exhaustive()
    }
}

impl MainSyncGate {
    pub fn new(source: Arc<dyn LastSyncSource>) -> Self {
        Self {
            source,
            notify: Arc::new(Notify::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_polls = max_polls;
        self
    }

    /// Upper bound on how long [`wait_for_main_sync`](Self::wait_for_main_sync) waits.
    pub fn timeout(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_polls)
    }

    /// Wake everyone currently waiting so they re-check the marker.
    pub fn notify_main_sync_complete(&self) {
        self.notify.notify_waiters();
    }

    async fn is_ready(&self) -> bool {
        match self.source.last_sync_at().await {
            Ok(marker) => marker.is_some(),
            Err(err) => {
                warn!(?err, "failed to read main sync marker");
                false
            }
        }
    }

    /// `true` once the main sync marker is present, `false` if it did not
    /// appear within [`timeout`](Self::timeout).
    ///
    /// The marker is read at most `max_polls` times, one interval apart,
    /// plus once per notification.
    pub async fn wait_for_main_sync(&self) -> bool {
        let start = Instant::now();
        // Saturate instead of overflowing the clock on absurd settings.
        let deadline = start
            .checked_add(self.timeout())
            .unwrap_or_else(|| start + FAR_FUTURE);
        let mut polls: u32 = 0;
        loop {
            // Register before checking so a notification between the check
            // and the select is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_ready().await {
                return true;
            }
            polls = polls.saturating_add(1);
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let next_poll = if polls >= self.max_polls {
                deadline
            } else {
                now.checked_add(self.poll_interval)
                    .map_or(deadline, |at| at.min(deadline))
            };
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(next_poll) => {
                    if polls >= self.max_polls {
                        break;
                    }
                }
            }
        }
        debug!(timeout = ?self.timeout(), polls, "main sync did not complete in time");
        false
    }
}
