//! Context-independent wiring shared by both execution contexts.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use uuid::Uuid;
use waypoint_store::{ListOrder, QueueStore, StateStore, StoreError};
use waypoint_transport::Transport;
use waypoint_types::GameState;

use crate::backoff::BackoffPolicy;
use crate::clock::Clock;
use crate::dispatch::Dispatcher;
use crate::drain::Drainer;
use crate::orchestrator::Orchestrator;
use crate::reconcile::Reconciler;
use crate::shim::{Notifier, WakeRegistrar};

const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Has a UI, connectivity signals and user notifications.
    Foreground,
    /// No UI; woken by the environment to replay the queue.
    Background,
}

impl ContextKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "page",
            Self::Background => "worker",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drain-in-progress flag of one context.
///
/// Cloning shares the flag, so a drainer and an orchestrator built from the
/// same guard never run concurrently.
#[derive(Debug, Clone, Default)]
pub struct SyncGuard {
    busy: Arc<AtomicBool>,
}

impl SyncGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when a drain or sync cycle is already running.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SyncPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held while a drain runs; releases the guard on drop.
#[derive(Debug)]
pub struct SyncPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Store, transport and policy handles shared by every component.
#[derive(Clone)]
pub struct SyncCore {
    pub queue: Arc<dyn QueueStore>,
    pub states: Arc<dyn StateStore>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
    pub backoff: BackoffPolicy,
    pub claim_lease: Duration,
}

impl fmt::Debug for SyncCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCore")
            .field("backoff", &self.backoff)
            .field("claim_lease", &self.claim_lease)
            .finish_non_exhaustive()
    }
}

impl SyncCore {
    #[must_use]
    pub fn new(
        queue: Arc<dyn QueueStore>,
        states: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            states,
            transport,
            clock,
            backoff: BackoffPolicy::default(),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    #[must_use]
    pub fn dispatcher(&self, wake: Arc<dyn WakeRegistrar>) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.transport),
            Arc::clone(&self.clock),
            wake,
        )
    }

    /// A drainer claiming entries under a fresh owner id for `context`.
    #[must_use]
    pub fn drainer(
        &self,
        context: ContextKind,
        guard: SyncGuard,
        wake: Arc<dyn WakeRegistrar>,
    ) -> Drainer {
        Drainer::new(
            self.dispatcher(wake),
            Arc::clone(&self.queue),
            Arc::clone(&self.clock),
            self.backoff,
            claim_owner(context),
            self.claim_lease,
            guard,
        )
    }

    #[must_use]
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.states),
            Arc::clone(&self.transport),
        )
    }

    #[must_use]
    pub fn orchestrator(
        &self,
        context: ContextKind,
        guard: SyncGuard,
        wake: Arc<dyn WakeRegistrar>,
        notifier: Arc<dyn Notifier>,
    ) -> Orchestrator {
        Orchestrator::new(
            self.drainer(context, guard, wake),
            self.reconciler(),
            Arc::clone(&self.queue),
            Arc::clone(&self.states),
            notifier,
        )
    }

    /// Queued entries that belong to the given game replica.
    pub fn pending_for(&self, state: &GameState) -> Result<usize, StoreError> {
        pending_for(self.queue.as_ref(), state)
    }
}

/// Count of queued entries targeting the replica's game and team.
///
/// The store-wide `count()` also includes other teams and undecodable rows.
pub fn pending_for(queue: &dyn QueueStore, state: &GameState) -> Result<usize, StoreError> {
    Ok(queue
        .list_all(ListOrder::Insertion)?
        .iter()
        .filter(|update| update.mutation.targets(state.game_id, state.team_id))
        .count())
}

/// Unique per context instance: two pages never share a claim owner.
fn claim_owner(context: ContextKind) -> String {
    format!("{context}-{}", Uuid::new_v4().simple())
}
