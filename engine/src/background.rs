//! Background context: no UI, woken to replay the queue within a time budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, sleep_until};
use waypoint_store::QueueStore;

use crate::bridge::{Bridge, ContextMessage};
use crate::drain::{DrainReport, Drainer};
use crate::error::SyncError;
use crate::shim::{NoWake, WakeQueue};
use crate::sync_core::{ContextKind, SyncCore, SyncGuard};

const DEFAULT_WAKE_BUDGET: Duration = Duration::from_secs(25);

#[derive(Debug)]
pub struct WakeReport {
    pub tags: Vec<String>,
    pub drain: DrainReport,
    /// Entries left in the store after the pass.
    pub remaining: usize,
}

pub struct BackgroundContext {
    drainer: Drainer,
    store: Arc<dyn QueueStore>,
    messages: broadcast::Sender<ContextMessage>,
    wake: Arc<WakeQueue>,
    budget: Duration,
    retry_after: Duration,
}

impl BackgroundContext {
    #[must_use]
    pub fn new(core: &SyncCore, bridge: &Bridge) -> Self {
        Self {
            // The drainer never schedules wakes; `run` re-arms its own timer.
            drainer: core.drainer(ContextKind::Background, SyncGuard::new(), Arc::new(NoWake)),
            store: Arc::clone(&core.queue),
            messages: bridge.sender(),
            wake: bridge.wake(),
            budget: DEFAULT_WAKE_BUDGET,
            retry_after: core.backoff.base,
        }
    }

    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Delay before `run` wakes itself to retry entries a pass left behind.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    #[must_use]
    pub fn claim_owner(&self) -> &str {
        self.drainer.owner()
    }

    /// Handle one wake: replay due entries until the queue or the budget is
    /// exhausted, and tell any open page what happened.
    ///
    /// `Ok(None)` when a previous wake is still draining.
    pub async fn handle_wake(&self, tags: Vec<String>) -> Result<Option<WakeReport>, SyncError> {
        let deadline = Instant::now() + self.budget;
        tracing::debug!(?tags, "Background wake");

        let drained = self
            .drainer
            .drain(
                || Instant::now() >= deadline,
                |update, outcome| {
                    if let Some(message) = ContextMessage::for_outcome(update, outcome) {
                        self.post(message);
                    }
                },
            )
            .await?;
        let Some(drain) = drained else {
            return Ok(None);
        };

        let remaining = self.store.count()?;
        self.post(ContextMessage::DrainFinished {
            flushed: drain.flushed(),
            remaining,
        });
        Ok(Some(WakeReport {
            tags,
            drain,
            remaining,
        }))
    }

    fn post(&self, message: ContextMessage) {
        // No open page is not an error.
        if self.messages.send(message).is_err() {
            tracing::trace!("No page listening for background messages");
        }
    }

    /// Serve wakes until `shutdown` turns `true` or its sender is dropped.
    ///
    /// A pass that leaves entries behind re-arms a wake after `retry_after`,
    /// so failed replays are retried without an outside trigger.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut retry_at: Option<Instant> = None;
        loop {
            let tags = tokio::select! {
                () = self.wake.wait() => self.wake.take(),
                () = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    tracing::debug!("Retrying entries left by the previous wake");
                    Vec::new()
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            retry_at = match self.handle_wake(tags).await {
                Ok(Some(report)) if !report.drain.left_work() => None,
                Ok(Some(_)) => Some(Instant::now() + self.retry_after),
                Ok(None) => retry_at,
                Err(err) => {
                    tracing::error!(error = %err, "Background drain failed");
                    Some(Instant::now() + self.retry_after)
                }
            };
        }
        tracing::debug!("Background context stopped");
    }
}
