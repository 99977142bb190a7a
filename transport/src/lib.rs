//! Network seam of the sync engine.
//!
//! The engine never touches HTTP directly. It hands an [`OutboundRequest`] to a
//! [`Transport`] and gets back either the decoded reply or a classified
//! [`TransportError`]. Classification is what drives retry policy upstream:
//! only [`TransportError::Rejected`] is terminal.

mod http;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;
use waypoint_types::{
    Attachment, GameId, HttpMethod, PendingUpdate, ServerSnapshot, TeamId, UpdateDraft,
};

pub use http::{HttpTransport, HttpTransportConfig, STATE_ENDPOINT};

/// Transport future type alias.
pub type TransportFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    /// HTTP 409: the referenced record no longer exists on the server.
    #[error("server rejected the update: referenced record no longer exists")]
    Rejected,
    #[error("server error: HTTP {status}")]
    Server { status: u16 },
    #[error("request refused: HTTP {status}")]
    Client { status: u16 },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Only a 409 is final; everything else is worth another attempt later.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected)
    }

    /// Classify a non-2xx status.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            409 => Self::Rejected,
            500..=599 => Self::Server { status },
            _ => Self::Client { status },
        }
    }
}

/// One attempt at delivering a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub path: String,
    pub method: HttpMethod,
    pub body: Value,
    pub attachment: Option<Attachment>,
    /// Sent as `Idempotency-Key`; identical on every attempt of one update.
    pub request_key: String,
    /// Attempts already made before this one.
    pub retry_count: u32,
}

impl OutboundRequest {
    #[must_use]
    pub fn from_draft(draft: &UpdateDraft) -> Self {
        Self {
            path: draft.mutation.endpoint().to_string(),
            method: draft.mutation.http_method(),
            body: draft.mutation.body(),
            attachment: draft.attachment.clone(),
            request_key: draft.request_key.clone(),
            retry_count: draft.attempts,
        }
    }

    #[must_use]
    pub fn from_pending(update: &PendingUpdate) -> Self {
        Self {
            path: update.target_url.clone(),
            method: update.http_method,
            body: update.mutation.body(),
            attachment: update.attachment.clone(),
            request_key: update.request_key.clone(),
            retry_count: update.attempts,
        }
    }

    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.attachment.is_some()
    }
}

/// Network access used by both execution contexts.
pub trait Transport: Send + Sync {
    /// Deliver one mutation. `Ok` carries the decoded reply (`Null` when the
    /// server answered with an empty body).
    fn send<'a>(&'a self, request: &'a OutboundRequest) -> TransportFut<'a, Value>;

    /// Fetch the authoritative progress of a team.
    fn fetch_state(&self, game_id: GameId, team_id: TeamId) -> TransportFut<'_, ServerSnapshot>;
}
