//! Durable persistence for the sync engine.
//!
//! Two things are persisted, each behind a small trait so both execution
//! contexts (and tests) can plug in their own backing:
//!
//! - [`QueueStore`]: the durable queue of pending updates. Every operation is
//!   atomic at the single-row level; two contexts may open the same SQLite file
//!   concurrently.
//! - [`StateStore`]: the per-game [`GameState`] replica.
//!
//! A failed write is always returned to the caller. Nothing here logs and
//! carries on.

mod memory;
mod sqlite;
mod sqlite_util;
mod state_file;

use std::path::PathBuf;

use thiserror::Error;
use waypoint_types::{GameId, GameState, MutationError, PendingUpdate, UpdateDraft, UpdateId};

pub use memory::{MemoryQueueStore, MemoryStateStore};
pub use sqlite::SqliteQueueStore;
pub use state_file::FileStateStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue storage unavailable: {0}")]
    Unavailable(String),
    #[error("queue storage is full")]
    Full,
    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("stored state at {} is corrupt: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },
    #[error("refusing to store invalid update: {0}")]
    Invalid(#[from] MutationError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) => Self::Full,
            Some(
                rusqlite::ErrorCode::CannotOpen
                | rusqlite::ErrorCode::ReadOnly
                | rusqlite::ErrorCode::PermissionDenied,
            ) => Self::Unavailable(err.to_string()),
            _ => Self::Database(err),
        }
    }
}

/// Order of [`QueueStore::list_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    /// By creation timestamp, ties broken by id. Deterministic replay order.
    #[default]
    Created,
    /// By store id only.
    Insertion,
}

/// A request to mark an entry in-flight for one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub owner: String,
    /// Milliseconds since the Unix epoch.
    pub now: i64,
    /// Claims older than this are considered abandoned.
    pub lease_ms: i64,
}

impl Claim {
    #[must_use]
    pub fn new(owner: impl Into<String>, now: i64, lease_ms: i64) -> Self {
        Self {
            owner: owner.into(),
            now,
            lease_ms,
        }
    }

    /// Claims stamped at or before this instant are expired.
    #[must_use]
    pub const fn expiry_cutoff(&self) -> i64 {
        self.now.saturating_sub(self.lease_ms)
    }
}

/// Crash-durable record of pending mutations.
pub trait QueueStore: Send + Sync {
    /// Persist a new entry. Returns the store-assigned, monotonic id.
    fn append(&self, draft: &UpdateDraft) -> Result<UpdateId, StoreError>;

    /// Every decodable entry. Rows that no longer decode are skipped.
    fn list_all(&self, order: ListOrder) -> Result<Vec<PendingUpdate>, StoreError>;

    fn get(&self, id: UpdateId) -> Result<Option<PendingUpdate>, StoreError>;

    /// Returns whether a row was deleted.
    fn remove(&self, id: UpdateId) -> Result<bool, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    /// Stamp a failed attempt. Returns `false` if the entry is gone.
    fn record_attempt(&self, id: UpdateId, attempts: u32, at: i64) -> Result<bool, StoreError>;

    /// Atomically move an entry to in-flight for `claim.owner`.
    ///
    /// Fails (returns `false`) when the entry is gone or another owner holds an
    /// unexpired claim.
    fn try_claim(&self, id: UpdateId, claim: &Claim) -> Result<bool, StoreError>;

    /// Return an entry to pending. A no-op unless `owner` holds the claim.
    fn release(&self, id: UpdateId, owner: &str) -> Result<(), StoreError>;
}

/// Persistence for the per-game client replica.
pub trait StateStore: Send + Sync {
    fn load(&self, game_id: GameId) -> Result<Option<GameState>, StoreError>;
    fn save(&self, state: &GameState) -> Result<(), StoreError>;
}
