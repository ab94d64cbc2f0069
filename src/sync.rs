//! Reconciliation of the local pinned list with the server copy.
//!
//! One call to [`PinnedSyncer::perform_pinned_sync`] is one session: wait for
//! the main sync, then try the merge up to `max_attempts` times with
//! exponential backoff between attempts.
use anyhow::{Context, Result};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::PinnedItemsService;
use crate::gate::MainSyncGate;
use crate::merge::{local_only_items, local_to_sync_payload, merge_pinned_verses, server_id_map};
use crate::model::{PinnedVerse, SyncPinnedItemPayload, TargetType};
use crate::report::{ErrorContext, ErrorReporter, TracingReporter};
use crate::store::{PinnedAction, PinnedStore};

pub const TRANSACTION_NAME: &str = "pinned-verses-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    WaitingForMainSync,
    Syncing { attempt: u32 },
    RetryScheduled { attempt: u32, delay: Duration },
    Succeeded,
    FailedPermanently,
    Abandoned,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Succeeded,
    /// The main sync never completed; nothing was attempted.
    Abandoned,
    FailedPermanently { attempts: u32 },
    /// A pending retry was cancelled.
    Cancelled,
}

/// Fetch the server list, push local-only pins, then write the merged list
/// and the server ids into `store`.
///
/// Any failed network call returns before the store is touched.
#[instrument(skip_all, fields(local = local_pinned.len(), mushaf_id = mushaf_id))]
pub async fn merge_and_sync_pinned_verses(
    api: &dyn PinnedItemsService,
    store: &dyn PinnedStore,
    local_pinned: &[PinnedVerse],
    mushaf_id: u32,
) -> Result<()> {
    let server_items = api
        .get_pinned_items(TargetType::Ayah)
        .await
        .context("failed to fetch pinned items")?;

    let local_only: Vec<SyncPinnedItemPayload> = local_only_items(&server_items, local_pinned)
        .into_iter()
        .map(|v| local_to_sync_payload(v, mushaf_id))
        .collect();
    if !local_only.is_empty() {
        api.sync_pinned_items(&local_only)
            .await
            .context("failed to push local pinned items")?;
    }

    let merged = merge_pinned_verses(&server_items, local_pinned);
    let merged_len = merged.len();
    store
        .dispatch(PinnedAction::SetPinnedVerses(merged))
        .await?;

    let ids = server_id_map(&server_items);
    if !ids.is_empty() {
        store.dispatch(PinnedAction::SetServerIds(ids)).await?;
    }

    info!(
        server = server_items.len(),
        pushed = local_only.len(),
        merged = merged_len,
        "pinned verses synced"
    );
    Ok(())
}

/// Sync session owner: retry bookkeeping, cancellation and single-flight.
pub struct PinnedSyncer {
    api: Arc<dyn PinnedItemsService>,
    store: Arc<dyn PinnedStore>,
    gate: MainSyncGate,
    reporter: Arc<dyn ErrorReporter>,
    policy: RetryPolicy,
    in_flight: tokio::sync::Mutex<()>,
    sessions_completed: AtomicU64,
    last_outcome: Mutex<Option<SyncOutcome>>,
    has_synced: AtomicBool,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    phase: watch::Sender<SyncPhase>,
}

impl std::fmt::Debug for PinnedSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedSyncer")
            .field("policy", &self.policy)
            .field("phase", &self.phase())
            .field("has_synced", &self.has_synced())
            .finish_non_exhaustive()
    }
}

impl PinnedSyncer {
    pub fn new(
        api: Arc<dyn PinnedItemsService>,
        store: Arc<dyn PinnedStore>,
        gate: MainSyncGate,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            api,
            store,
            gate,
            reporter: Arc::new(TracingReporter),
            policy: RetryPolicy::default(),
            in_flight: tokio::sync::Mutex::new(()),
            sessions_completed: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
            has_synced: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            phase,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn gate(&self) -> &MainSyncGate {
        &self.gate
    }

    pub fn has_synced(&self) -> bool {
        self.has_synced.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Cancel the pending retry of the running session, if any. A request
    /// already on the wire is left to finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    /// Run a sync session in the background.
    pub fn spawn(self: Arc<Self>, mushaf_id: u32) -> JoinHandle<SyncOutcome> {
        tokio::spawn(async move { self.perform_pinned_sync(mushaf_id).await })
    }

    /// Run one sync session. Callers arriving while a session is in flight
    /// wait for it and get its outcome.
    pub async fn perform_pinned_sync(&self, mushaf_id: u32) -> SyncOutcome {
        let seen = self.sessions_completed.load(Ordering::SeqCst);
        let _guard = self.in_flight.lock().await;
        if self.sessions_completed.load(Ordering::SeqCst) != seen {
            if let Some(outcome) = self.last_outcome() {
                debug!(?outcome, "joined in-flight pinned sync");
                return outcome;
            }
        }

        self.cancelled.store(false, Ordering::SeqCst);
        let outcome = self.run_session(mushaf_id).await;

        if let Ok(mut last) = self.last_outcome.lock() {
            *last = Some(outcome);
        }
        self.sessions_completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn last_outcome(&self) -> Option<SyncOutcome> {
        self.last_outcome.lock().ok().and_then(|g| *g)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }

    async fn run_session(&self, mushaf_id: u32) -> SyncOutcome {
        self.set_phase(SyncPhase::WaitingForMainSync);
        if !self.gate.wait_for_main_sync().await {
            debug!("main sync not ready; skipping pinned verse sync");
            self.set_phase(SyncPhase::Abandoned);
            return SyncOutcome::Abandoned;
        }

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 0..max_attempts {
            self.set_phase(SyncPhase::Syncing { attempt });
            let (pinned_count, result) = self.attempt(mushaf_id).await;
            let err = match result {
                Ok(()) => {
                    self.has_synced.store(true, Ordering::SeqCst);
                    self.set_phase(SyncPhase::Succeeded);
                    return SyncOutcome::Succeeded;
                }
                Err(err) => err,
            };

            self.reporter.report(
                &err,
                &ErrorContext {
                    transaction_name: TRANSACTION_NAME,
                    metadata: json!({
                        "pinnedCount": pinned_count,
                        "mushafId": mushaf_id,
                        "attempt": attempt,
                    }),
                },
            );

            if attempt + 1 >= max_attempts {
                break;
            }
            let delay = self.policy.delay_for(attempt);
            warn!(attempt, ?delay, "pinned verse sync failed; retrying");
            self.set_phase(SyncPhase::RetryScheduled {
                attempt: attempt + 1,
                delay,
            });
            if self.wait_or_cancel(delay).await {
                info!("pending pinned verse sync retry cancelled");
                self.set_phase(SyncPhase::Cancelled);
                return SyncOutcome::Cancelled;
            }
        }

        warn!(attempts = max_attempts, "pinned verse sync gave up");
        self.set_phase(SyncPhase::FailedPermanently);
        SyncOutcome::FailedPermanently {
            attempts: max_attempts,
        }
    }

    async fn attempt(&self, mushaf_id: u32) -> (usize, Result<()>) {
        let local = match self.store.snapshot().await {
            Ok(local) => local,
            Err(err) => return (0, Err(err.context("failed to read local pinned verses"))),
        };
        let result =
            merge_and_sync_pinned_verses(self.api.as_ref(), self.store.as_ref(), &local, mushaf_id)
                .await;
        (local.len(), result)
    }

    /// Sleep for `delay`; `true` if [`cancel`](Self::cancel) interrupted it.
    async fn wait_or_cancel(&self, delay: Duration) -> bool {
        let notified = self.cancel_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = &mut notified => true,
        }
    }
}
