//! Reconciliation Client: merge the server's record into the local replica.
//!
//! The server wins for confirmed state. Still-queued found mutations are
//! re-applied on top so unacknowledged progress survives, and only entries
//! the snapshot already reflects are purged from the queue.

use std::sync::Arc;

use waypoint_store::{ListOrder, QueueStore, StateStore};
use waypoint_transport::Transport;
use waypoint_types::{GameState, LocationId, PendingUpdate, ServerSnapshot, UpdateId};

use crate::error::SyncError;

/// Pure outcome of merging a snapshot into a replica.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Queue entries whose effect the server already records.
    pub purge: Vec<UpdateId>,
    /// Locations kept found because a queued mutation is still pending.
    pub reapplied: Vec<LocationId>,
}

/// Apply `snapshot` to `state` and decide which queued entries are redundant.
///
/// Only found mutations for the replica's own game and team take part.
pub fn merge(state: &mut GameState, snapshot: &ServerSnapshot, queued: &[PendingUpdate]) -> MergePlan {
    state.apply_snapshot(snapshot);

    let mut plan = MergePlan::default();
    for update in queued {
        if !update.mutation.targets(state.game_id, state.team_id) {
            continue;
        }
        let Some(location_id) = update.mutation.location_id() else {
            continue;
        };
        if snapshot.confirms(location_id) {
            plan.purge.push(update.id);
        } else if state.reapply_pending(location_id) {
            plan.reapplied.push(location_id);
        }
    }
    plan
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub snapshot: ServerSnapshot,
    /// Entries removed from the queue.
    pub purged: Vec<UpdateId>,
    pub reapplied: Vec<LocationId>,
    /// The replica differs from what it was before the merge.
    pub state_changed: bool,
}

impl ReconcileReport {
    #[must_use]
    pub fn changed_anything(&self) -> bool {
        self.state_changed || !self.purged.is_empty()
    }
}

pub struct Reconciler {
    store: Arc<dyn QueueStore>,
    states: Arc<dyn StateStore>,
    transport: Arc<dyn Transport>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        states: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            states,
            transport,
        }
    }

    /// Fetch the authoritative record for the replica's team and merge it.
    ///
    /// The merged state is persisted before anything is purged, so a crash in
    /// between leaves a redundant entry rather than lost progress.
    pub async fn fetch_server_game_state(
        &self,
        state: &mut GameState,
    ) -> Result<ReconcileReport, SyncError> {
        let snapshot = self
            .transport
            .fetch_state(state.game_id, state.team_id)
            .await?;
        let queued = self.store.list_all(ListOrder::Created)?;

        let before = state.clone();
        let plan = merge(state, &snapshot, &queued);
        let state_changed = *state != before;
        if state_changed {
            self.states.save(state)?;
        }

        let mut purged = Vec::with_capacity(plan.purge.len());
        for id in plan.purge {
            if self.store.remove(id)? {
                tracing::info!(update_id = %id, "Dropped queued update already reflected on server");
                purged.push(id);
            }
        }

        tracing::debug!(
            game_id = %state.game_id,
            team_id = %state.team_id,
            current_index = state.current_index(),
            purged = purged.len(),
            reapplied = plan.reapplied.len(),
            "Reconciled with server state"
        );
        Ok(ReconcileReport {
            snapshot,
            purged,
            reapplied: plan.reapplied,
            state_changed,
        })
    }
}
