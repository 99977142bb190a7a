//! In-memory stores for tests and for contexts without a filesystem.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use waypoint_types::{GameId, GameState, PendingUpdate, UpdateDraft, UpdateId};

use crate::{Claim, ListOrder, QueueStore, StateStore, StoreError};

#[derive(Debug)]
struct Row {
    update: PendingUpdate,
    claimed_by: Option<String>,
    claimed_at: i64,
}

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<UpdateId, Row>,
    next_id: i64,
}

/// Non-durable [`QueueStore`] with a switch to simulate unavailable storage.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `false`, every write fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("queue lock poisoned".to_string()))
    }

    fn writable(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("storage disabled".to_string()));
        }
        self.lock()
    }
}

impl QueueStore for MemoryQueueStore {
    fn append(&self, draft: &UpdateDraft) -> Result<UpdateId, StoreError> {
        draft.validate()?;
        let mut inner = self.writable()?;
        inner.next_id += 1;
        let id = UpdateId::new(inner.next_id);
        let update = PendingUpdate {
            id,
            target_url: draft.mutation.endpoint().to_string(),
            http_method: draft.mutation.http_method(),
            mutation: draft.mutation.clone(),
            attachment: draft.attachment.clone(),
            created_at: draft.created_at,
            attempts: draft.attempts,
            last_attempt_at: draft.last_attempt_at,
            request_key: draft.request_key.clone(),
        };
        inner.rows.insert(
            id,
            Row {
                update,
                claimed_by: None,
                claimed_at: 0,
            },
        );
        Ok(id)
    }

    fn list_all(&self, order: ListOrder) -> Result<Vec<PendingUpdate>, StoreError> {
        let inner = self.lock()?;
        let mut updates: Vec<_> = inner.rows.values().map(|row| row.update.clone()).collect();
        if order == ListOrder::Created {
            updates.sort_by_key(|u| (u.created_at, u.id));
        }
        Ok(updates)
    }

    fn get(&self, id: UpdateId) -> Result<Option<PendingUpdate>, StoreError> {
        Ok(self.lock()?.rows.get(&id).map(|row| row.update.clone()))
    }

    fn remove(&self, id: UpdateId) -> Result<bool, StoreError> {
        Ok(self.writable()?.rows.remove(&id).is_some())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.rows.len())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.writable()?.rows.clear();
        Ok(())
    }

    fn record_attempt(&self, id: UpdateId, attempts: u32, at: i64) -> Result<bool, StoreError> {
        let mut inner = self.writable()?;
        let Some(row) = inner.rows.get_mut(&id) else {
            return Ok(false);
        };
        row.update.attempts = attempts;
        row.update.last_attempt_at = Some(at);
        Ok(true)
    }

    fn try_claim(&self, id: UpdateId, claim: &Claim) -> Result<bool, StoreError> {
        let mut inner = self.writable()?;
        let Some(row) = inner.rows.get_mut(&id) else {
            return Ok(false);
        };
        let free = match &row.claimed_by {
            None => true,
            Some(owner) => owner == &claim.owner || row.claimed_at <= claim.expiry_cutoff(),
        };
        if free {
            row.claimed_by = Some(claim.owner.clone());
            row.claimed_at = claim.now;
        }
        Ok(free)
    }

    fn release(&self, id: UpdateId, owner: &str) -> Result<(), StoreError> {
        let mut inner = self.writable()?;
        if let Some(row) = inner.rows.get_mut(&id)
            && row.claimed_by.as_deref() == Some(owner)
        {
            row.claimed_by = None;
        }
        Ok(())
    }
}

/// Non-durable [`StateStore`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<GameId, GameState>>,
    unavailable: AtomicBool,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `false`, every save fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, game_id: GameId) -> Result<Option<GameState>, StoreError> {
        let states = self
            .states
            .lock()
            .map_err(|_| StoreError::Unavailable("state lock poisoned".to_string()))?;
        Ok(states.get(&game_id).cloned())
    }

    fn save(&self, state: &GameState) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("storage disabled".to_string()));
        }
        let mut states = self
            .states
            .lock()
            .map_err(|_| StoreError::Unavailable("state lock poisoned".to_string()))?;
        states.insert(state.game_id, state.clone());
        Ok(())
    }
}
