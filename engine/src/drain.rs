//! Queue Drainer: replay every due entry, oldest first.
//!
//! One drain per context at a time ([`SyncGuard`]); across contexts each
//! entry is claimed in the store before it is replayed, so the same entry is
//! never in flight twice.

use std::sync::Arc;
use std::time::Duration;

use waypoint_store::{Claim, ListOrder, QueueStore};
use waypoint_types::{PendingUpdate, UpdateId};

use crate::backoff::BackoffPolicy;
use crate::clock::Clock;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::SyncError;
use crate::sync_core::{SyncGuard, SyncPermit};

/// What one pass over the queue did.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Entries the server accepted, in replay order.
    pub delivered: Vec<PendingUpdate>,
    /// Entries the server rejected with 409.
    pub rejected: Vec<PendingUpdate>,
    /// Entries attempted and still queued.
    pub requeued: Vec<UpdateId>,
    /// Entries still inside their backoff window.
    pub not_due: usize,
    /// Entries in flight in another context.
    pub claimed_elsewhere: usize,
    /// Entries skipped because the store failed underneath them.
    pub storage_failures: usize,
    /// The stop predicate ended the pass before the end of the queue.
    pub stopped_early: bool,
}

impl DrainReport {
    /// Entries successfully flushed.
    #[must_use]
    pub fn flushed(&self) -> usize {
        self.delivered.len()
    }

    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.rejected.len() + self.requeued.len()
    }

    /// Whether entries remain that a later pass should retry.
    #[must_use]
    pub fn left_work(&self) -> bool {
        !self.requeued.is_empty()
            || self.not_due > 0
            || self.claimed_elsewhere > 0
            || self.storage_failures > 0
            || self.stopped_early
    }

    /// Whether the pass changed the queue at all.
    #[must_use]
    pub fn removed_any(&self) -> bool {
        !self.delivered.is_empty() || !self.rejected.is_empty()
    }
}

pub struct Drainer {
    dispatcher: Dispatcher,
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    owner: String,
    lease: Duration,
    guard: SyncGuard,
}

impl Drainer {
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        backoff: BackoffPolicy,
        owner: String,
        lease: Duration,
        guard: SyncGuard,
    ) -> Self {
        Self {
            dispatcher,
            store,
            clock,
            backoff,
            owner,
            lease,
            guard,
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn guard(&self) -> &SyncGuard {
        &self.guard
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Drain the queue. Returns `Ok(None)` when a drain is already running in
    /// this context.
    ///
    /// `stop` is checked after each replayed entry; `on_outcome` sees every
    /// entry that was attempted.
    pub async fn drain<S, F>(&self, stop: S, on_outcome: F) -> Result<Option<DrainReport>, SyncError>
    where
        S: Fn() -> bool,
        F: FnMut(&PendingUpdate, &DispatchOutcome),
    {
        let Some(permit) = self.guard.try_acquire() else {
            tracing::debug!(owner = %self.owner, "Drain already in progress; skipping");
            return Ok(None);
        };
        self.drain_with(&permit, stop, on_outcome).await.map(Some)
    }

    /// Drain while the caller already holds this context's permit.
    pub(crate) async fn drain_with<S, F>(
        &self,
        _permit: &SyncPermit,
        stop: S,
        mut on_outcome: F,
    ) -> Result<DrainReport, SyncError>
    where
        S: Fn() -> bool,
        F: FnMut(&PendingUpdate, &DispatchOutcome),
    {
        let mut report = DrainReport::default();
        let updates = self.store.list_all(ListOrder::Created)?;
        if updates.is_empty() {
            return Ok(report);
        }
        tracing::debug!(owner = %self.owner, queued = updates.len(), "Draining queue");

        for listed in updates {
            if !self.is_due(&listed) {
                report.not_due += 1;
                continue;
            }

            let Some(update) = self.claim(&listed, &mut report) else {
                continue;
            };

            match self.dispatcher.replay(&update).await {
                Ok(outcome) => {
                    on_outcome(&update, &outcome);
                    match outcome {
                        DispatchOutcome::Sent { .. } => report.delivered.push(update),
                        DispatchOutcome::Rejected { .. } => report.rejected.push(update),
                        DispatchOutcome::Queued { id, .. } => {
                            self.release(id);
                            report.requeued.push(id);
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(update_id = %update.id, error = %err, "Storage failure during replay");
                    report.storage_failures += 1;
                    self.release(update.id);
                }
            }

            if stop() {
                report.stopped_early = true;
                break;
            }
        }

        tracing::info!(
            owner = %self.owner,
            flushed = report.flushed(),
            rejected = report.rejected.len(),
            requeued = report.requeued.len(),
            not_due = report.not_due,
            "Drain finished"
        );
        Ok(report)
    }

    fn is_due(&self, update: &PendingUpdate) -> bool {
        self.backoff
            .is_due(update.attempts, update.last_attempt_at, self.clock.now_ms())
    }

    /// Claim an entry and re-read it. `None` means skip it.
    fn claim(&self, listed: &PendingUpdate, report: &mut DrainReport) -> Option<PendingUpdate> {
        let lease_ms = i64::try_from(self.lease.as_millis()).unwrap_or(i64::MAX);
        let claim = Claim::new(self.owner.clone(), self.clock.now_ms(), lease_ms);
        match self.store.try_claim(listed.id, &claim) {
            Ok(true) => {}
            Ok(false) => {
                report.claimed_elsewhere += 1;
                return None;
            }
            Err(err) => {
                tracing::error!(update_id = %listed.id, error = %err, "Failed to claim queued update");
                report.storage_failures += 1;
                return None;
            }
        }

        // Another context may have attempted it between listing and claiming.
        let fresh = match self.store.get(listed.id) {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return None,
            Err(err) => {
                tracing::error!(update_id = %listed.id, error = %err, "Failed to reload queued update");
                report.storage_failures += 1;
                self.release(listed.id);
                return None;
            }
        };
        if fresh.attempts != listed.attempts && !self.is_due(&fresh) {
            report.not_due += 1;
            self.release(fresh.id);
            return None;
        }
        Some(fresh)
    }

    fn release(&self, id: UpdateId) {
        if let Err(err) = self.store.release(id, &self.owner) {
            // The lease expires on its own; nothing is lost.
            tracing::warn!(update_id = %id, error = %err, "Failed to release claim");
        }
    }
}
