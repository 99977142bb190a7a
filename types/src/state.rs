//! The client replica of a team's progress through a game.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{GameId, LocationId, TeamId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationProgress {
    pub id: LocationId,
    #[serde(default)]
    pub found: bool,
    /// Found flag set optimistically and not yet confirmed by the server.
    #[serde(default)]
    pub local_only: bool,
}

impl LocationProgress {
    #[must_use]
    pub const fn new(id: LocationId) -> Self {
        Self {
            id,
            found: false,
            local_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("location {0} is not part of this game")]
    UnknownLocation(LocationId),
    #[error("current index {index} exceeds {len} locations")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Result of marking a location found locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub index: usize,
    /// The flag was already set before this call.
    pub already_found: bool,
    /// Every location is now found.
    pub completed: bool,
}

/// Client replica of a team's game progress.
///
/// Invariants: `current_index <= locations.len()`, and `current_index` only
/// moves backwards through [`GameState::reset`] or [`GameState::switch_team`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub game_id: GameId,
    pub team_id: TeamId,
    pub locations: Vec<LocationProgress>,
    current_index: usize,
}

impl GameState {
    #[must_use]
    pub fn new(game_id: GameId, team_id: TeamId, location_ids: &[LocationId]) -> Self {
        Self {
            game_id,
            team_id,
            locations: location_ids.iter().copied().map(LocationProgress::new).collect(),
            current_index: 0,
        }
    }

    /// Build from server-supplied initial data, clamping the index.
    #[must_use]
    pub fn from_parts(
        game_id: GameId,
        team_id: TeamId,
        locations: Vec<LocationProgress>,
        current_index: usize,
    ) -> Self {
        let current_index = current_index.min(locations.len());
        Self {
            game_id,
            team_id,
            locations,
            current_index,
        }
    }

    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn position(&self, location_id: LocationId) -> Option<usize> {
        self.locations.iter().position(|loc| loc.id == location_id)
    }

    #[must_use]
    pub fn location(&self, location_id: LocationId) -> Option<&LocationProgress> {
        self.locations.iter().find(|loc| loc.id == location_id)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.locations.is_empty() && self.locations.iter().all(|loc| loc.found)
    }

    /// Re-check the invariants after loading from disk.
    pub fn validate(&self) -> Result<(), StateError> {
        if self.current_index > self.locations.len() {
            return Err(StateError::IndexOutOfRange {
                index: self.current_index,
                len: self.locations.len(),
            });
        }
        Ok(())
    }

    /// Raise `current_index` to at least `index`, never past the end.
    fn advance_to(&mut self, index: usize) {
        let target = index.min(self.locations.len());
        if target > self.current_index {
            self.current_index = target;
        }
    }

    /// Optimistically mark a location found and advance past it.
    ///
    /// Idempotent: marking the same location twice does not advance twice.
    pub fn mark_found_optimistic(&mut self, location_id: LocationId) -> Result<Advance, StateError> {
        let index = self
            .position(location_id)
            .ok_or(StateError::UnknownLocation(location_id))?;
        let location = &mut self.locations[index];
        let already_found = location.found;
        if !already_found {
            location.found = true;
            location.local_only = true;
        }
        self.advance_to(index + 1);
        Ok(Advance {
            index,
            already_found,
            completed: self.is_complete(),
        })
    }

    /// The server acknowledged the location; drop the optimistic marker.
    pub fn confirm_found(&mut self, location_id: LocationId) -> Result<(), StateError> {
        let index = self
            .position(location_id)
            .ok_or(StateError::UnknownLocation(location_id))?;
        let location = &mut self.locations[index];
        location.found = true;
        location.local_only = false;
        self.advance_to(index + 1);
        Ok(())
    }

    /// Undo an optimistic found flag after a terminal rejection.
    ///
    /// Confirmed flags are left alone, and `current_index` is not rewound.
    /// Returns whether anything changed.
    pub fn drop_optimistic(&mut self, location_id: LocationId) -> bool {
        match self.locations.iter_mut().find(|loc| loc.id == location_id) {
            Some(location) if location.local_only => {
                location.found = false;
                location.local_only = false;
                true
            }
            _ => false,
        }
    }

    /// Overwrite confirmed state from an authoritative snapshot.
    ///
    /// Locations are matched by id; ids the server does not mention keep
    /// their local flags. The index never moves backwards.
    pub fn apply_snapshot(&mut self, snapshot: &ServerSnapshot) {
        for flag in &snapshot.locations_found {
            if let Some(location) = self.locations.iter_mut().find(|loc| loc.id == flag.id) {
                location.found = flag.found;
                location.local_only = false;
            }
        }
        self.advance_to(snapshot.current_index);
    }

    /// Re-apply a still-queued found mutation on top of server state.
    ///
    /// Returns `true` when the location exists in this game.
    pub fn reapply_pending(&mut self, location_id: LocationId) -> bool {
        let Some(index) = self.position(location_id) else {
            return false;
        };
        let location = &mut self.locations[index];
        if !location.found {
            location.found = true;
            location.local_only = true;
        }
        self.advance_to(index + 1);
        true
    }

    /// Full reset: every flag cleared and the index back to zero.
    pub fn reset(&mut self) {
        for location in &mut self.locations {
            location.found = false;
            location.local_only = false;
        }
        self.current_index = 0;
    }

    /// Switching teams restarts progress locally until the server answers.
    pub fn switch_team(&mut self, team_id: TeamId) {
        self.team_id = team_id;
        self.reset();
    }

    /// Locations found locally but not yet confirmed.
    #[must_use]
    pub fn unconfirmed(&self) -> Vec<LocationId> {
        self.locations
            .iter()
            .filter(|loc| loc.local_only)
            .map(|loc| loc.id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationFlag {
    pub id: LocationId,
    pub found: bool,
}

/// Authoritative progress record returned by the reconciliation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub current_index: usize,
    #[serde(default)]
    pub locations_found: Vec<LocationFlag>,
}

impl ServerSnapshot {
    /// Whether the server already records this location as found.
    #[must_use]
    pub fn confirms(&self, location_id: LocationId) -> bool {
        self.locations_found
            .iter()
            .any(|flag| flag.id == location_id && flag.found)
    }
}
