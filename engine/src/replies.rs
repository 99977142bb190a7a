//! Typed views over mutation replies that carry authoritative progress.

use serde::Deserialize;
use serde_json::Value;
use waypoint_types::{GameId, GameState, LocationProgress, TeamId};

#[derive(Debug, Deserialize)]
struct TeamRef {
    id: TeamId,
}

#[derive(Debug, Deserialize)]
struct GameRef {
    id: GameId,
}

/// Reply to a team switch: the new team's full progress.
#[derive(Debug, Deserialize)]
pub struct ProgressReply {
    #[serde(default)]
    pub success: bool,
    team: TeamRef,
    game: GameRef,
    #[serde(default)]
    locations: Vec<LocationProgress>,
    #[serde(default)]
    current_index: usize,
    #[serde(default)]
    pub message: Option<String>,
}

impl ProgressReply {
    /// `None` unless the reply is a successful progress payload.
    #[must_use]
    pub fn parse(reply: &Value) -> Option<Self> {
        serde_json::from_value::<Self>(reply.clone())
            .ok()
            .filter(|reply| reply.success)
    }

    #[must_use]
    pub fn into_state(self) -> GameState {
        let locations = self
            .locations
            .into_iter()
            .map(|loc| LocationProgress {
                local_only: false,
                ..loc
            })
            .collect();
        GameState::from_parts(self.game.id, self.team.id, locations, self.current_index)
    }
}

/// Reply to a join request.
#[derive(Debug, Default, Deserialize)]
pub struct JoinReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub game_id: Option<GameId>,
    #[serde(default)]
    pub message: Option<String>,
}

impl JoinReply {
    /// An empty or unrecognized body reads as an unsuccessful reply.
    #[must_use]
    pub fn parse(reply: &Value) -> Self {
        serde_json::from_value(reply.clone()).unwrap_or_default()
    }
}
