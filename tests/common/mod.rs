//! Shared test utilities and fixtures
//!
//! A harness is one device: a temp data directory holding the SQLite queue
//! and state files, a mock server, and a manual clock. Each call to
//! [`Harness::core`] opens a fresh store handle, the way a second context
//! would.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use url::Url;
use waypoint_engine::{
    BackoffPolicy, ForegroundContext, ManualClock, RecordingNotifier, SyncCore, WakeQueue,
};
use waypoint_store::{FileStateStore, SqliteQueueStore};
use waypoint_transport::{HttpTransport, HttpTransportConfig};
use waypoint_types::{GameId, GameState, LocationId, TeamId, ValidationMode, ValidationOutcome};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const GAME: GameId = GameId::new(7);
pub const TEAM: TeamId = TeamId::new(3);
pub const FOUND_PATH: &str = "/api/location/found";
pub const STATE_PATH: &str = "/api/game/state";
pub const START_MS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub dir: TempDir,
    pub server: MockServer,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub async fn start() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            server: MockServer::start().await,
            clock: Arc::new(ManualClock::new(START_MS)),
        }
    }

    pub fn queue(&self) -> Arc<SqliteQueueStore> {
        Arc::new(SqliteQueueStore::open(self.dir.path().join("queue.sqlite3")).unwrap())
    }

    pub fn states(&self) -> Arc<FileStateStore> {
        Arc::new(FileStateStore::new(self.dir.path()))
    }

    pub fn transport(&self) -> Arc<HttpTransport> {
        let base = Url::parse(&self.server.uri()).unwrap();
        Arc::new(
            HttpTransport::new(
                HttpTransportConfig::new(base).with_timeout(Duration::from_secs(2)),
            )
            .unwrap(),
        )
    }

    /// Core over a fresh queue handle, with jitter-free backoff.
    pub fn core(&self) -> SyncCore {
        SyncCore::new(self.queue(), self.states(), self.transport(), self.clock.clone())
            .with_backoff(BackoffPolicy::deterministic(
                Duration::from_secs(2),
                Duration::from_secs(60),
            ))
    }

    /// A page over `state`, with its own notifier and wake queue.
    pub fn page(&self, state: GameState) -> Page {
        let notifier = Arc::new(RecordingNotifier::new());
        let wake = Arc::new(WakeQueue::new());
        let context = ForegroundContext::new(self.core(), state, notifier.clone(), wake.clone());
        Page {
            context,
            notifier,
            wake,
        }
    }

    pub async fn found_requests(&self) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == FOUND_PATH)
            .collect()
    }

    /// Location ids of JSON found requests, in arrival order.
    pub async fn found_locations(&self) -> Vec<i64> {
        self.found_requests()
            .await
            .iter()
            .filter_map(|request| serde_json::from_slice::<Value>(&request.body).ok())
            .filter_map(|body| body["location_id"].as_i64())
            .collect()
    }
}

pub struct Page {
    pub context: ForegroundContext,
    pub notifier: Arc<RecordingNotifier>,
    pub wake: Arc<WakeQueue>,
}

pub fn state(locations: &[i64]) -> GameState {
    let ids: Vec<_> = locations.iter().copied().map(LocationId::new).collect();
    GameState::new(GAME, TEAM, &ids)
}

pub fn passed(location: i64) -> ValidationOutcome {
    ValidationOutcome::passed(ValidationMode::Qr, LocationId::new(location))
}

pub async fn mount_found(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(FOUND_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"success": status < 300})))
        .mount(server)
        .await;
}

pub async fn mount_state(server: &MockServer, current_index: usize, found: &[(i64, bool)]) {
    let locations: Vec<Value> = found
        .iter()
        .map(|&(id, found)| json!({"id": id, "found": found}))
        .collect();
    Mock::given(method("GET"))
        .and(path(STATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "current_index": current_index,
            "locations_found": locations,
        })))
        .mount(server)
        .await;
}
