//! Update Dispatcher: one delivery attempt, falling back to the durable queue.
//!
//! State machine of a queued entry:
//!
//! ```text
//! Pending --claim--> InFlight --2xx--> Confirmed (row deleted)
//!                             --409--> Rejected  (row deleted)
//!                             --else-> Pending   (attempts + 1, after backoff)
//! ```
//!
//! The outcome is returned to the caller instead of being delivered through
//! callbacks; the caller refreshes its pending indicator afterwards.

use std::sync::Arc;

use serde_json::Value;
use waypoint_store::QueueStore;
use waypoint_transport::{OutboundRequest, Transport};
use waypoint_types::{PendingUpdate, UpdateDraft, UpdateId};

use crate::clock::Clock;
use crate::error::SyncError;
use crate::shim::{WakeRegistrar, wake_tag};

/// Why an update ended up in the queue.
#[derive(Debug)]
pub enum QueueCause {
    /// No connectivity; no network attempt was made.
    Offline,
    /// The attempt failed with a retryable error.
    Failed(SyncError),
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The server accepted the update. `id` is the removed queue row, if any.
    Sent { id: Option<UpdateId>, reply: Value },
    /// The update is (still) queued.
    Queued { id: UpdateId, cause: QueueCause },
    /// The server answered 409. Any queue row is gone; drop dependent
    /// optimistic state.
    Rejected { id: Option<UpdateId> },
}

impl DispatchOutcome {
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    #[must_use]
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    wake: Arc<dyn WakeRegistrar>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        wake: Arc<dyn WakeRegistrar>,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            wake,
        }
    }

    /// Try to deliver a new mutation; queue it when that is not possible.
    ///
    /// With `online == false` no network attempt is made. A storage failure
    /// while queueing is returned as `Err`: the update would otherwise be lost.
    pub async fn send_or_queue(
        &self,
        mut draft: UpdateDraft,
        online: bool,
    ) -> Result<DispatchOutcome, SyncError> {
        if !online {
            let id = self.store.append(&draft)?;
            tracing::info!(update_id = %id, kind = %draft.mutation.kind(), "Offline; update queued");
            self.request_wake(&draft.mutation);
            return Ok(DispatchOutcome::Queued {
                id,
                cause: QueueCause::Offline,
            });
        }

        let request = OutboundRequest::from_draft(&draft);
        match self.transport.send(&request).await {
            Ok(reply) => Ok(DispatchOutcome::Sent { id: None, reply }),
            Err(err) if err.is_terminal() => {
                tracing::warn!(kind = %draft.mutation.kind(), "Update rejected by server");
                Ok(DispatchOutcome::Rejected { id: None })
            }
            Err(err) => {
                draft.attempts += 1;
                draft.last_attempt_at = Some(self.clock.now_ms());
                let id = self.store.append(&draft)?;
                tracing::info!(
                    update_id = %id,
                    attempts = draft.attempts,
                    error = %err,
                    "Send failed; update queued"
                );
                self.request_wake(&draft.mutation);
                Ok(DispatchOutcome::Queued {
                    id,
                    cause: QueueCause::Failed(err.into()),
                })
            }
        }
    }

    /// Replay an entry that is already in the queue. Always hits the network.
    pub async fn replay(&self, update: &PendingUpdate) -> Result<DispatchOutcome, SyncError> {
        let request = OutboundRequest::from_pending(update);
        match self.transport.send(&request).await {
            Ok(reply) => {
                self.store.remove(update.id)?;
                tracing::info!(update_id = %update.id, "Queued update delivered");
                Ok(DispatchOutcome::Sent {
                    id: Some(update.id),
                    reply,
                })
            }
            Err(err) if err.is_terminal() => {
                self.store.remove(update.id)?;
                tracing::warn!(
                    update_id = %update.id,
                    location_id = ?update.mutation.location_id(),
                    "Queued update rejected; record deleted on server"
                );
                Ok(DispatchOutcome::Rejected {
                    id: Some(update.id),
                })
            }
            Err(err) => {
                let attempts = update.attempts.saturating_add(1);
                self.store
                    .record_attempt(update.id, attempts, self.clock.now_ms())?;
                tracing::debug!(
                    update_id = %update.id,
                    attempts,
                    error = %err,
                    "Replay failed; update stays queued"
                );
                self.request_wake(&update.mutation);
                Ok(DispatchOutcome::Queued {
                    id: update.id,
                    cause: QueueCause::Failed(err.into()),
                })
            }
        }
    }

    fn request_wake(&self, mutation: &waypoint_types::Mutation) {
        let tag = wake_tag(mutation.team_id());
        if !self.wake.register(&tag) {
            tracing::debug!(%tag, "No background wake available");
        }
    }
}
