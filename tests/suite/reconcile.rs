//! Merging the server's record with queued local progress.

use waypoint_engine::SyncTrigger;
use waypoint_store::{ListOrder, QueueStore, StateStore};
use waypoint_types::LocationId;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{GAME, Harness, STATE_PATH, mount_found, mount_state, passed, state};

#[tokio::test]
async fn stale_entry_is_purged_without_resending() {
    let h = Harness::start().await;
    mount_state(&h.server, 2, &[(1, true), (2, true), (3, false)]).await;

    let mut page = h.page(state(&[1, 2, 3])).context.with_online(false);
    page.submit_validation(passed(2)).await.unwrap();
    page.submit_validation(passed(3)).await.unwrap();
    assert_eq!(h.queue().count().unwrap(), 2);

    let mut replica = page.state().clone();
    let report = h
        .core()
        .reconciler()
        .fetch_server_game_state(&mut replica)
        .await
        .unwrap();

    assert_eq!(report.purged.len(), 1);
    assert_eq!(report.reapplied, vec![LocationId::new(3)]);
    let remaining = h.queue().list_all(ListOrder::Created).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].mutation.location_id(), Some(LocationId::new(3)));

    let l3 = replica.location(LocationId::new(3)).unwrap();
    assert!(l3.found && l3.local_only);
    assert_eq!(replica.current_index(), 3);
    assert!(h.found_requests().await.is_empty());
    assert_eq!(h.states().load(GAME).unwrap(), Some(replica));
}

#[tokio::test]
async fn snapshot_is_requested_for_the_replica_team() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path(STATE_PATH))
        .and(query_param("game_id", "7"))
        .and(query_param("team_id", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "current_index": 1,
            "locations_found": [{"id": "1", "found": true}]
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut page = h.page(state(&[1, 2])).context;
    page.sync(SyncTrigger::Startup).await.unwrap();

    assert_eq!(page.state().current_index(), 1);
    assert!(page.state().location(LocationId::new(1)).unwrap().found);
    h.server.verify().await;
}

#[tokio::test]
async fn failed_fetch_keeps_queue_and_next_sync_recovers() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path(STATE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;
    mount_state(&h.server, 1, &[(1, true)]).await;
    mount_found(&h.server, 503).await;

    let mut page = h.page(state(&[1, 2])).context.with_online(false);
    page.submit_validation(passed(1)).await.unwrap();

    let first = page.set_online(true).await.unwrap().unwrap();
    let report = first.report().unwrap();
    assert!(report.reconcile_error.is_some());
    assert_eq!(h.queue().count().unwrap(), 1);

    let second = page.sync(SyncTrigger::UserRequest).await.unwrap();
    let report = second.report().unwrap();
    assert!(report.reconcile.is_some());
    // The server now records the location, so the entry is purged.
    assert_eq!(h.queue().count().unwrap(), 0);
    assert!(page.state().unconfirmed().is_empty());
}

#[tokio::test]
async fn server_progress_for_unqueued_location_wins() {
    let h = Harness::start().await;
    mount_state(&h.server, 0, &[(1, false), (2, false)]).await;

    // Found locally and confirmed from this device's point of view, then
    // removed from the queue by some other path.
    let mut replica = state(&[1, 2]);
    replica.mark_found_optimistic(LocationId::new(1)).unwrap();

    let report = h
        .core()
        .reconciler()
        .fetch_server_game_state(&mut replica)
        .await
        .unwrap();
    assert!(report.state_changed);
    assert!(!replica.location(LocationId::new(1)).unwrap().found);
    // The index is never rewound by reconciliation.
    assert_eq!(replica.current_index(), 1);
}
