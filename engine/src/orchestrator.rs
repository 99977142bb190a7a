//! Sync Orchestrator: drain, then reconcile, then refresh the view.

use std::fmt;
use std::sync::Arc;

use waypoint_store::{QueueStore, StateStore};
use waypoint_types::{GameState, NotifyLevel};

use crate::drain::{DrainReport, Drainer};
use crate::error::SyncError;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::shim::Notifier;
use crate::sync_core::pending_for;

pub const REJECTED_MESSAGE: &str = "This location was deleted on server; update removed.";
pub const STORAGE_FAILURE_MESSAGE: &str =
    "Some offline updates could not be saved or read; progress may not be synced.";

/// What started a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Reconnect,
    UserRequest,
    Wake,
}

impl SyncTrigger {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Reconnect => "reconnect",
            Self::UserRequest => "user",
            Self::Wake => "wake",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub drain: DrainReport,
    /// `None` when the authoritative fetch failed; see `reconcile_error`.
    pub reconcile: Option<ReconcileReport>,
    pub reconcile_error: Option<SyncError>,
    /// Something visible changed and the view was refreshed.
    pub refreshed: bool,
}

#[derive(Debug)]
pub enum SyncOutcome {
    /// Another drain or cycle is running in this context.
    Busy,
    Completed(SyncReport),
}

impl SyncOutcome {
    #[must_use]
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Busy => None,
            Self::Completed(report) => Some(report),
        }
    }
}

pub struct Orchestrator {
    drainer: Drainer,
    reconciler: Reconciler,
    store: Arc<dyn QueueStore>,
    states: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        drainer: Drainer,
        reconciler: Reconciler,
        store: Arc<dyn QueueStore>,
        states: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            drainer,
            reconciler,
            store,
            states,
            notifier,
        }
    }

    #[must_use]
    pub fn drainer(&self) -> &Drainer {
        &self.drainer
    }

    /// One full cycle. A failed authoritative fetch is reported, not returned
    /// as an error, so the next trigger runs normally. Storage failures are
    /// shown to the user and returned.
    pub async fn sync_with_server(
        &self,
        state: &mut GameState,
        trigger: SyncTrigger,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(permit) = self.drainer.guard().try_acquire() else {
            tracing::debug!(%trigger, "Sync already running; skipping");
            return Ok(SyncOutcome::Busy);
        };
        tracing::debug!(%trigger, "Sync cycle started");

        let drain = self
            .drainer
            .drain_with(&permit, || false, |_, _| {})
            .await
            .map_err(|err| self.escalate(err))?;

        // Removed entries are gone for good: tell the user before anything
        // else can fail.
        for _ in &drain.rejected {
            self.notifier.notify(REJECTED_MESSAGE, NotifyLevel::Error);
        }
        if drain.storage_failures > 0 {
            self.notifier
                .notify(STORAGE_FAILURE_MESSAGE, NotifyLevel::Error);
        }

        let drained_into_state = self.apply_drain(state, &drain);
        if drained_into_state && let Err(err) = self.states.save(state) {
            self.notifier.render_from_state(state);
            return Err(self.escalate(err.into()));
        }

        let (reconcile, reconcile_error) =
            match self.reconciler.fetch_server_game_state(state).await {
                Ok(report) => (Some(report), None),
                Err(err) if err.is_storage() => return Err(self.escalate(err)),
                Err(err) => {
                    tracing::warn!(%trigger, error = %err, "Could not fetch server state");
                    (None, Some(err))
                }
            };
        drop(permit);

        let refreshed = drained_into_state
            || drain.removed_any()
            || reconcile
                .as_ref()
                .is_some_and(ReconcileReport::changed_anything);
        if refreshed {
            self.notifier.render_from_state(state);
            let pending = pending_for(self.store.as_ref(), state)
                .map_err(|err| self.escalate(err.into()))?;
            self.notifier.update_pending_indicator(pending);
        }

        Ok(SyncOutcome::Completed(SyncReport {
            trigger,
            drain,
            reconcile,
            reconcile_error,
            refreshed,
        }))
    }

    /// Confirm delivered and drop rejected found flags. Returns whether the
    /// replica changed.
    fn apply_drain(&self, state: &mut GameState, drain: &DrainReport) -> bool {
        let before = state.clone();
        for update in &drain.delivered {
            if update.mutation.targets(state.game_id, state.team_id)
                && !update.mutation.needs_review()
                && let Some(location_id) = update.mutation.location_id()
                && state.confirm_found(location_id).is_err()
            {
                tracing::debug!(%location_id, "Delivered location is not in this game");
            }
        }
        for update in &drain.rejected {
            if update.mutation.targets(state.game_id, state.team_id)
                && let Some(location_id) = update.mutation.location_id()
            {
                state.drop_optimistic(location_id);
            }
        }
        *state != before
    }

    fn escalate(&self, err: SyncError) -> SyncError {
        if err.is_storage() {
            tracing::error!(error = %err, "Storage failure during sync");
            self.notifier
                .notify(STORAGE_FAILURE_MESSAGE, NotifyLevel::Error);
        }
        err
    }
}
