use thiserror::Error;
use waypoint_store::StoreError;
use waypoint_transport::TransportError;
use waypoint_types::StateError;

/// Failure taxonomy of a sync operation.
///
/// Only [`SyncError::Rejected`] is terminal for a queued update. Storage
/// failures are never retried silently: they are surfaced to the user.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("referenced record no longer exists on the server")]
    Rejected,
    #[error("server error: HTTP {status}")]
    Server { status: u16 },
    #[error("request refused: HTTP {status}")]
    Client { status: u16 },
    #[error("malformed server response: {0}")]
    Malformed(String),
    #[error("local storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error(transparent)]
    State(#[from] StateError),
}

impl SyncError {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected)
    }

    /// Transient failures: the update stays queued and is retried with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Timeout
                | Self::Server { .. }
                | Self::Client { .. }
                | Self::Malformed(_)
        )
    }

    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(message) => Self::Network(message),
            TransportError::Timeout => Self::Timeout,
            TransportError::Rejected => Self::Rejected,
            TransportError::Server { status } => Self::Server { status },
            TransportError::Client { status } => Self::Client { status },
            TransportError::Malformed(message) => Self::Malformed(message),
        }
    }
}
