//! Offline-first sync engine for waypoint.
//!
//! Mutations are applied optimistically, sent when possible and queued
//! durably when not. Queued entries are replayed with backoff by whichever
//! context gets there first, then the replica is reconciled against the
//! server's authoritative record.
//!
//! Two contexts run the same protocol: [`ForegroundContext`] (the open page,
//! with a view) and [`BackgroundContext`] (no view, woken by tag). They share
//! nothing but the durable store and talk through a [`Bridge`].

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod background;
mod backoff;
mod bridge;
mod clock;
mod dispatch;
mod drain;
mod error;
mod foreground;
mod orchestrator;
mod reconcile;
mod replies;
mod shim;
mod sync_core;

#[cfg(test)]
mod test_support;

pub use background::{BackgroundContext, WakeReport};
pub use backoff::BackoffPolicy;
pub use bridge::{Bridge, ContextMessage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchOutcome, Dispatcher, QueueCause};
pub use drain::{DrainReport, Drainer};
pub use error::SyncError;
pub use foreground::{
    COMPLETED_MESSAGE, CONFIRMED_MESSAGE, ForegroundContext, JOIN_QUEUED_MESSAGE,
    PENDING_VALIDATION_MESSAGE, PageCommand, SubmitResult, TEAM_SWITCH_QUEUED_MESSAGE,
};
pub use orchestrator::{
    Orchestrator, REJECTED_MESSAGE, STORAGE_FAILURE_MESSAGE, SyncOutcome, SyncReport, SyncTrigger,
};
pub use reconcile::{MergePlan, ReconcileReport, Reconciler, merge};
pub use replies::{JoinReply, ProgressReply};
pub use shim::{
    NoWake, NoopNotifier, Notification, Notifier, RecordingNotifier, WakeQueue, WakeRegistrar,
    wake_tag,
};
pub use sync_core::{ContextKind, SyncCore, SyncGuard, SyncPermit, pending_for};
