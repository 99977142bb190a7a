//! Shared fixtures for the engine's unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use waypoint_transport::{OutboundRequest, Transport, TransportError, TransportFut};
use waypoint_types::{
    GameId, GameState, LocationFound, LocationId, Mutation, ServerSnapshot, TeamId, UpdateDraft,
    ValidationMode,
};

pub const GAME: GameId = GameId::new(1);
pub const TEAM: TeamId = TeamId::new(2);

/// Replies are consumed in order; an empty script answers `{"success": true}`.
#[derive(Default)]
pub struct ScriptedTransport {
    sends: Mutex<VecDeque<Result<Value, TransportError>>>,
    snapshots: Mutex<VecDeque<Result<ServerSnapshot, TransportError>>>,
    fallback_snapshot: Mutex<Option<ServerSnapshot>>,
    sent: Mutex<Vec<OutboundRequest>>,
    fetches: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_send(&self, reply: Result<Value, TransportError>) {
        self.sends.lock().unwrap().push_back(reply);
    }

    pub fn push_snapshot(&self, reply: Result<ServerSnapshot, TransportError>) {
        self.snapshots.lock().unwrap().push_back(reply);
    }

    /// Answer every unscripted fetch with this snapshot.
    pub fn set_snapshot(&self, snapshot: ServerSnapshot) {
        *self.fallback_snapshot.lock().unwrap() = Some(snapshot);
    }

    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(&'a self, request: &'a OutboundRequest) -> TransportFut<'a, Value> {
        self.sent.lock().unwrap().push(request.clone());
        let reply = self
            .sends
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"success": true})));
        Box::pin(async move { reply })
    }

    fn fetch_state(&self, _game_id: GameId, _team_id: TeamId) -> TransportFut<'_, ServerSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let scripted = self.snapshots.lock().unwrap().pop_front();
        let reply = scripted.unwrap_or_else(|| {
            self.fallback_snapshot
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| TransportError::Network("no snapshot scripted".to_string()))
        });
        Box::pin(async move { reply })
    }
}

pub fn found_mutation(location: i64) -> Mutation {
    Mutation::LocationFound(LocationFound {
        game_id: GAME,
        team_id: TEAM,
        location_id: LocationId::new(location),
        method: ValidationMode::Button,
        metadata: Value::Null,
        needs_validation: false,
    })
}

pub fn found_draft(location: i64, created_at: i64) -> UpdateDraft {
    UpdateDraft::new(found_mutation(location), created_at)
}

/// A found location the server will review before counting it.
pub fn reviewed_found_draft(location: i64, created_at: i64) -> UpdateDraft {
    let Mutation::LocationFound(mut body) = found_mutation(location) else {
        unreachable!("found_mutation builds a LocationFound")
    };
    body.needs_validation = true;
    UpdateDraft::new(Mutation::LocationFound(body), created_at)
}

pub fn game_state(locations: &[i64]) -> GameState {
    let ids: Vec<_> = locations.iter().copied().map(LocationId::new).collect();
    GameState::new(GAME, TEAM, &ids)
}
