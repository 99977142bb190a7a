//! Retry scheduling against the real store.

use std::sync::Arc;
use std::time::Duration;

use waypoint_engine::{BackoffPolicy, ContextKind, NoWake, SyncGuard};
use waypoint_store::{ListOrder, QueueStore};
use waypoint_types::{LocationFound, LocationId, Mutation, UpdateDraft, ValidationMode};

use crate::common::{GAME, Harness, START_MS, TEAM, mount_found};

fn found_draft(location: i64) -> UpdateDraft {
    UpdateDraft::new(
        Mutation::LocationFound(LocationFound {
            game_id: GAME,
            team_id: TEAM,
            location_id: LocationId::new(location),
            method: ValidationMode::Geo,
            metadata: serde_json::json!({"accuracy_m": 12}),
            needs_validation: false,
        }),
        START_MS,
    )
}

#[tokio::test]
async fn failed_entry_waits_out_its_backoff() {
    let h = Harness::start().await;
    mount_found(&h.server, 503).await;
    let core = h.core();
    let drainer = core.drainer(ContextKind::Background, SyncGuard::new(), Arc::new(NoWake));

    core.dispatcher(Arc::new(NoWake))
        .send_or_queue(found_draft(1), true)
        .await
        .unwrap();
    assert_eq!(h.found_requests().await.len(), 1);

    // attempts = 1: due 2s after the last try.
    let report = drainer.drain(|| false, |_, _| {}).await.unwrap().unwrap();
    assert_eq!(report.not_due, 1);
    assert_eq!(h.found_requests().await.len(), 1);

    h.clock.advance(Duration::from_secs(2));
    let report = drainer.drain(|| false, |_, _| {}).await.unwrap().unwrap();
    assert_eq!(report.requeued.len(), 1);
    assert_eq!(h.found_requests().await.len(), 2);

    // attempts = 2: due 4s after the last try.
    h.clock.advance(Duration::from_secs(3));
    let report = drainer.drain(|| false, |_, _| {}).await.unwrap().unwrap();
    assert_eq!(report.not_due, 1);
    h.clock.advance(Duration::from_secs(1));
    drainer.drain(|| false, |_, _| {}).await.unwrap();
    assert_eq!(h.found_requests().await.len(), 3);

    let entry = &h.queue().list_all(ListOrder::Created).unwrap()[0];
    assert_eq!(entry.attempts, 3);
    assert_eq!(entry.last_attempt_at, Some(START_MS + 6_000));
}

#[tokio::test]
async fn one_failure_does_not_abort_the_pass() {
    let h = Harness::start().await;
    let server = &h.server;
    wiremock::Mock::given(wiremock::matchers::body_partial_json(
        serde_json::json!({"location_id": 1}),
    ))
    .respond_with(wiremock::ResponseTemplate::new(500))
    .mount(server)
    .await;
    mount_found(server, 200).await;

    let queue = h.queue();
    for location in 1..=3 {
        queue.append(&found_draft(location)).unwrap();
    }
    let drainer = h
        .core()
        .drainer(ContextKind::Foreground, SyncGuard::new(), Arc::new(NoWake));
    let report = drainer.drain(|| false, |_, _| {}).await.unwrap().unwrap();

    assert_eq!(report.flushed(), 2);
    assert_eq!(report.requeued.len(), 1);
    assert_eq!(h.found_locations().await, vec![1, 2, 3]);
    assert_eq!(queue.count().unwrap(), 1);
}

#[test]
fn jittered_delays_respect_floor_and_cap() {
    let policy = BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(60), 0.25);
    for attempts in 1..=10 {
        let nominal = policy.nominal_delay(attempts);
        let (low, high) = policy.bounds(attempts);
        for _ in 0..50 {
            let delay = policy.delay_for(attempts);
            assert!(delay >= low && delay <= high);
            assert!(delay <= Duration::from_secs(60));
        }
        assert!(nominal <= Duration::from_secs(60));
    }
    assert_eq!(policy.nominal_delay(1), Duration::from_secs(2));
    assert_eq!(policy.nominal_delay(3), Duration::from_secs(8));
    assert_eq!(policy.nominal_delay(10), Duration::from_secs(60));
}
