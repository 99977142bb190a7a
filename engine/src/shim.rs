//! Per-context capabilities: user notification and deferred-replay wake-ups.
//!
//! A context without a UI gets [`NoopNotifier`]; one without a wake facility
//! gets [`NoWake`]. The protocol code never checks for a capability.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;

use tokio::sync::Notify;
use waypoint_types::{GameState, NotifyLevel, TeamId};

/// Rendering collaborator.
pub trait Notifier: Send + Sync {
    fn render_from_state(&self, state: &GameState);
    fn update_pending_indicator(&self, count: usize);
    fn notify(&self, message: &str, level: NotifyLevel);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn render_from_state(&self, _state: &GameState) {}
    fn update_pending_indicator(&self, _count: usize) {}
    fn notify(&self, _message: &str, _level: NotifyLevel) {}
}

/// Everything a [`RecordingNotifier`] saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Render { current_index: usize },
    Pending(usize),
    Message { text: String, level: NotifyLevel },
}

/// Collects notifications in memory for headless runs and inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Notification) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// User-facing messages only.
    #[must_use]
    pub fn messages(&self) -> Vec<(String, NotifyLevel)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Notification::Message { text, level } => Some((text, level)),
                _ => None,
            })
            .collect()
    }

    /// Last value pushed to the pending indicator.
    #[must_use]
    pub fn last_pending(&self) -> Option<usize> {
        self.events().into_iter().rev().find_map(|event| match event {
            Notification::Pending(count) => Some(count),
            _ => None,
        })
    }

    #[must_use]
    pub fn render_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Notification::Render { .. }))
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Notifier for RecordingNotifier {
    fn render_from_state(&self, state: &GameState) {
        self.push(Notification::Render {
            current_index: state.current_index(),
        });
    }

    fn update_pending_indicator(&self, count: usize) {
        self.push(Notification::Pending(count));
    }

    fn notify(&self, message: &str, level: NotifyLevel) {
        self.push(Notification::Message {
            text: message.to_string(),
            level,
        });
    }
}

const WAKE_TAG_PREFIX: &str = "sync-found-locations";

/// Tag under which a deferred replay is registered.
#[must_use]
pub fn wake_tag(team_id: Option<TeamId>) -> String {
    match team_id {
        Some(team_id) => format!("{WAKE_TAG_PREFIX}-{team_id}"),
        None => WAKE_TAG_PREFIX.to_string(),
    }
}

/// Asks the environment to wake a background context later.
pub trait WakeRegistrar: Send + Sync {
    /// Returns `false` when the environment cannot wake anything.
    fn register(&self, tag: &str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoWake;

impl WakeRegistrar for NoWake {
    fn register(&self, _tag: &str) -> bool {
        false
    }
}

/// In-process wake source. Registrations with the same tag coalesce until
/// the background context takes them.
#[derive(Default)]
pub struct WakeQueue {
    tags: Mutex<BTreeSet<String>>,
    notify: Notify,
}

impl fmt::Debug for WakeQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeQueue")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl WakeQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until at least one registration is pending.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Drain the pending tags.
    pub fn take(&self) -> Vec<String> {
        self.tags
            .lock()
            .map(|mut tags| std::mem::take(&mut *tags).into_iter().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        self.tags
            .lock()
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Trigger a wake without a tag, as a periodic or manual "retry now".
    pub fn poke(&self) {
        self.notify.notify_one();
    }
}

impl WakeRegistrar for WakeQueue {
    fn register(&self, tag: &str) -> bool {
        let inserted = match self.tags.lock() {
            Ok(mut tags) => tags.insert(tag.to_string()),
            Err(_) => return false,
        };
        if inserted {
            self.notify.notify_one();
        }
        true
    }
}
