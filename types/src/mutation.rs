//! The closed set of mutations the client can queue.
//!
//! Each kind has a fixed wire schema. Queued bodies are decoded back through
//! [`Mutation::decode`] so a row that no longer matches its schema is caught at
//! the store boundary instead of being replayed blindly.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::{GameId, LocationId, TeamId};

/// How the player proved they reached a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Button,
    Qr,
    Image,
    Geo,
    Selfie,
    Direct,
}

impl ValidationMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Qr => "qr",
            Self::Image => "image",
            Self::Geo => "geo",
            Self::Selfie => "selfie",
            Self::Direct => "direct",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MutationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "button" => Ok(Self::Button),
            "qr" => Ok(Self::Qr),
            "image" => Ok(Self::Image),
            "geo" => Ok(Self::Geo),
            "selfie" => Ok(Self::Selfie),
            "direct" => Ok(Self::Direct),
            _ => Err(MutationError::UnknownMode(raw.to_string())),
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MutationError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            _ => Err(MutationError::UnknownMethod(raw.to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("unknown mutation kind: {0}")]
    UnknownKind(String),
    #[error("unknown validation mode: {0}")]
    UnknownMode(String),
    #[error("unknown http method: {0}")]
    UnknownMethod(String),
    #[error("invalid {kind} body: {message}")]
    InvalidBody {
        kind: MutationKind,
        message: String,
    },
    #[error("join requires either a team id or a new team name")]
    EmptyJoinTarget,
    #[error("attachments are only accepted on location-found mutations")]
    UnexpectedAttachment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    LocationFound,
    TeamSwitch,
    JoinGame,
}

impl MutationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocationFound => "location_found",
            Self::TeamSwitch => "team_switch",
            Self::JoinGame => "join_game",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MutationError> {
        match raw {
            "location_found" => Ok(Self::LocationFound),
            "team_switch" => Ok(Self::TeamSwitch),
            "join_game" => Ok(Self::JoinGame),
            other => Err(MutationError::UnknownKind(other.to_string())),
        }
    }

    /// Server path the mutation is posted to.
    #[must_use]
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::LocationFound => "/api/location/found",
            Self::TeamSwitch => "/api/switch_team",
            Self::JoinGame => "/api/joingame",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationFound {
    pub game_id: GameId,
    pub team_id: TeamId,
    pub location_id: LocationId,
    pub method: ValidationMode,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub needs_validation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamSwitch {
    pub team_id: TeamId,
}

/// Which team a join request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    Existing(TeamId),
    NewTeam(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JoinGameWire", into = "JoinGameWire")]
pub struct JoinGame {
    pub game_id: GameId,
    pub target: JoinTarget,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct JoinGameWire {
    game_id: GameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    team_id: Option<TeamId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_team_name: Option<String>,
}

impl TryFrom<JoinGameWire> for JoinGame {
    type Error = MutationError;

    fn try_from(wire: JoinGameWire) -> Result<Self, Self::Error> {
        let name = wire
            .new_team_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        let target = match (name, wire.team_id) {
            // A fresh team name wins over a stale select value.
            (Some(name), _) => JoinTarget::NewTeam(name),
            (None, Some(team_id)) => JoinTarget::Existing(team_id),
            (None, None) => return Err(MutationError::EmptyJoinTarget),
        };
        Ok(Self {
            game_id: wire.game_id,
            target,
        })
    }
}

impl From<JoinGame> for JoinGameWire {
    fn from(join: JoinGame) -> Self {
        let (team_id, new_team_name) = match join.target {
            JoinTarget::Existing(team_id) => (Some(team_id), None),
            JoinTarget::NewTeam(name) => (None, Some(name)),
        };
        Self {
            game_id: join.game_id,
            team_id,
            new_team_name,
        }
    }
}

/// A mutating action, as queued and as sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    LocationFound(LocationFound),
    TeamSwitch(TeamSwitch),
    JoinGame(JoinGame),
}

impl Mutation {
    #[must_use]
    pub const fn kind(&self) -> MutationKind {
        match self {
            Self::LocationFound(_) => MutationKind::LocationFound,
            Self::TeamSwitch(_) => MutationKind::TeamSwitch,
            Self::JoinGame(_) => MutationKind::JoinGame,
        }
    }

    #[must_use]
    pub const fn endpoint(&self) -> &'static str {
        self.kind().endpoint()
    }

    /// All mutations are POSTs today; kept explicit for the record schema.
    #[must_use]
    pub const fn http_method(&self) -> HttpMethod {
        HttpMethod::Post
    }

    /// The JSON body sent on the wire.
    #[must_use]
    pub fn body(&self) -> Value {
        let encoded = match self {
            Self::LocationFound(body) => serde_json::to_value(body),
            Self::TeamSwitch(body) => serde_json::to_value(body),
            Self::JoinGame(body) => serde_json::to_value(body.clone()),
        };
        // Every field is a plain number, string, bool or Value.
        encoded.unwrap_or(Value::Null)
    }

    /// Rebuild a mutation from its stored kind and body.
    pub fn decode(kind: MutationKind, body: &Value) -> Result<Self, MutationError> {
        let invalid = |err: serde_json::Error| MutationError::InvalidBody {
            kind,
            message: err.to_string(),
        };
        match kind {
            MutationKind::LocationFound => serde_json::from_value(body.clone())
                .map(Self::LocationFound)
                .map_err(invalid),
            MutationKind::TeamSwitch => serde_json::from_value(body.clone())
                .map(Self::TeamSwitch)
                .map_err(invalid),
            MutationKind::JoinGame => serde_json::from_value(body.clone())
                .map(Self::JoinGame)
                .map_err(invalid),
        }
    }

    #[must_use]
    pub fn location_id(&self) -> Option<LocationId> {
        match self {
            Self::LocationFound(body) => Some(body.location_id),
            _ => None,
        }
    }

    /// A found location the server accepted but still has to review. Its
    /// delivery does not confirm the local flag.
    #[must_use]
    pub fn needs_review(&self) -> bool {
        matches!(self, Self::LocationFound(body) if body.needs_validation)
    }

    #[must_use]
    pub fn team_id(&self) -> Option<TeamId> {
        match self {
            Self::LocationFound(body) => Some(body.team_id),
            Self::TeamSwitch(body) => Some(body.team_id),
            Self::JoinGame(body) => match body.target {
                JoinTarget::Existing(team_id) => Some(team_id),
                JoinTarget::NewTeam(_) => None,
            },
        }
    }

    #[must_use]
    pub fn game_id(&self) -> Option<GameId> {
        match self {
            Self::LocationFound(body) => Some(body.game_id),
            Self::TeamSwitch(_) => None,
            Self::JoinGame(body) => Some(body.game_id),
        }
    }

    /// Whether this mutation belongs to the given game and team.
    #[must_use]
    pub fn targets(&self, game_id: GameId, team_id: TeamId) -> bool {
        self.game_id() == Some(game_id) && self.team_id() == Some(team_id)
    }
}

/// Binary evidence sent alongside a mutation as a multipart file part.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Multipart field name of the binary part.
    pub const FIELD: &'static str = "photo";
    /// Multipart field name of the JSON payload sent next to the binary part.
    pub const PAYLOAD_FIELD: &'static str = "payload";

    #[must_use]
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

// Bytes are elided so queue dumps and logs stay readable.
impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}
