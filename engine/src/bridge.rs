//! Message passing between the foreground and background contexts.
//!
//! The contexts share no memory besides the durable store. The background
//! context posts [`ContextMessage`]s; the foreground wakes it through the
//! [`WakeQueue`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use waypoint_types::{GameId, LocationId, PendingUpdate, TeamId, UpdateId};

use crate::dispatch::DispatchOutcome;
use crate::shim::WakeQueue;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextMessage {
    UpdateSent {
        id: UpdateId,
        game_id: Option<GameId>,
        team_id: Option<TeamId>,
        location_id: Option<LocationId>,
        /// Accepted, but the server still reviews it; not a confirmation.
        #[serde(default)]
        pending_review: bool,
    },
    UpdateRejected {
        id: UpdateId,
        location_id: Option<LocationId>,
    },
    DrainFinished {
        flushed: usize,
        remaining: usize,
    },
}

impl ContextMessage {
    /// Message announcing the outcome of a replayed entry, if it is final.
    #[must_use]
    pub fn for_outcome(update: &PendingUpdate, outcome: &DispatchOutcome) -> Option<Self> {
        match outcome {
            DispatchOutcome::Sent { .. } => Some(Self::UpdateSent {
                id: update.id,
                game_id: update.mutation.game_id(),
                team_id: update.mutation.team_id(),
                location_id: update.mutation.location_id(),
                pending_review: update.mutation.needs_review(),
            }),
            DispatchOutcome::Rejected { .. } => Some(Self::UpdateRejected {
                id: update.id,
                location_id: update.mutation.location_id(),
            }),
            DispatchOutcome::Queued { .. } => None,
        }
    }
}

/// Both halves of the channel pair connecting the contexts.
#[derive(Debug, Clone)]
pub struct Bridge {
    messages: broadcast::Sender<ContextMessage>,
    wake: Arc<WakeQueue>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    #[must_use]
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            messages,
            wake: Arc::new(WakeQueue::new()),
        }
    }

    /// A receiver for an open page.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ContextMessage> {
        self.messages.subscribe()
    }

    #[must_use]
    pub fn sender(&self) -> broadcast::Sender<ContextMessage> {
        self.messages.clone()
    }

    #[must_use]
    pub fn wake(&self) -> Arc<WakeQueue> {
        Arc::clone(&self.wake)
    }
}
