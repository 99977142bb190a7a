//! Submitting while offline, then reconnecting.

use serde_json::Value;
use waypoint_engine::{CONFIRMED_MESSAGE, DispatchOutcome, REJECTED_MESSAGE, SubmitResult};
use waypoint_store::{ListOrder, QueueStore};
use waypoint_types::{Attachment, LocationId, NotifyLevel};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{FOUND_PATH, Harness, mount_found, mount_state, passed, state};

#[tokio::test]
async fn offline_find_is_delivered_after_reconnect() {
    let h = Harness::start().await;
    mount_found(&h.server, 200).await;
    mount_state(&h.server, 1, &[(1, true), (2, false)]).await;

    let mut page = h.page(state(&[1, 2])).context.with_online(false);
    page.submit_validation(passed(1)).await.unwrap();

    let queued = h.queue().list_all(ListOrder::Created).unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].mutation.location_id(), Some(LocationId::new(1)));
    assert_eq!(queued[0].attempts, 0);
    assert!(h.found_requests().await.is_empty());

    page.set_online(true).await.unwrap();

    assert_eq!(h.queue().count().unwrap(), 0);
    assert_eq!(page.state().current_index(), 1);
    let location = page.state().location(LocationId::new(1)).unwrap();
    assert!(location.found && !location.local_only);
    assert_eq!(h.found_locations().await, vec![1]);
}

#[tokio::test]
async fn conflict_removes_entry_and_leaves_location_unfound() {
    let h = Harness::start().await;
    mount_found(&h.server, 409).await;
    mount_state(&h.server, 0, &[(1, false), (2, false)]).await;

    let page = h.page(state(&[1, 2]));
    let notifier = page.notifier.clone();
    let mut page = page.context.with_online(false);
    page.submit_validation(passed(2)).await.unwrap();
    assert_eq!(h.queue().count().unwrap(), 1);

    page.set_online(true).await.unwrap();

    assert_eq!(h.queue().count().unwrap(), 0);
    assert!(!page.state().location(LocationId::new(2)).unwrap().found);
    assert!(
        notifier
            .messages()
            .contains(&(REJECTED_MESSAGE.to_string(), NotifyLevel::Error))
    );
    assert_eq!(h.found_requests().await.len(), 1);
}

#[tokio::test]
async fn other_client_errors_stay_queued() {
    let h = Harness::start().await;
    mount_found(&h.server, 422).await;

    let mut page = h.page(state(&[1])).context;
    let result = page.submit_validation(passed(1)).await.unwrap();

    assert!(matches!(
        result,
        SubmitResult::Dispatched(DispatchOutcome::Queued { .. })
    ));
    let queued = h.queue().list_all(ListOrder::Created).unwrap();
    assert_eq!(queued[0].attempts, 1);
    assert!(queued[0].last_attempt_at.is_some());
    assert!(page.state().location(LocationId::new(1)).unwrap().local_only);
}

#[tokio::test]
async fn photo_evidence_is_sent_as_multipart() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path(FOUND_PATH))
        .and(body_string_contains("name=\"payload\""))
        .and(body_string_contains("name=\"photo\""))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&h.server)
        .await;
    mount_state(&h.server, 0, &[]).await;

    let mut outcome = passed(1);
    outcome.attachment = Some(Attachment::new("selfie.jpg", "image/jpeg", b"jpeg".to_vec()));

    // Online: sent straight away.
    let mut online = h.page(state(&[1, 2])).context;
    online.submit_validation(outcome.clone()).await.unwrap();
    assert_eq!(h.queue().count().unwrap(), 0);

    // Offline: the attachment survives the queue and is replayed as multipart.
    let mut offline = h.page(state(&[1, 2])).context.with_online(false);
    offline.submit_validation(outcome).await.unwrap();
    let queued = h.queue().list_all(ListOrder::Created).unwrap();
    assert_eq!(queued[0].to_record().is_multipart, Some(true));
    offline.set_online(true).await.unwrap();

    assert_eq!(h.queue().count().unwrap(), 0);
    h.server.verify().await;
}

#[tokio::test]
async fn resubmitting_a_confirmed_location_does_not_advance_twice() {
    let h = Harness::start().await;
    mount_found(&h.server, 200).await;

    let page = h.page(state(&[1, 2, 3]));
    let notifier = page.notifier.clone();
    let mut page = page.context;
    page.submit_validation(passed(1)).await.unwrap();
    page.submit_validation(passed(1)).await.unwrap();

    assert_eq!(page.state().current_index(), 1);
    assert!(!page.state().location(LocationId::new(2)).unwrap().found);
    let confirmations = notifier
        .messages()
        .iter()
        .filter(|(text, _)| text == CONFIRMED_MESSAGE)
        .count();
    assert_eq!(confirmations, 2);
}

#[tokio::test]
async fn requests_carry_a_stable_idempotency_key() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path(FOUND_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;
    mount_found(&h.server, 200).await;
    mount_state(&h.server, 1, &[(1, true)]).await;

    let mut page = h.page(state(&[1])).context;
    page.submit_validation(passed(1)).await.unwrap();
    h.clock.advance(std::time::Duration::from_secs(5));
    page.sync(waypoint_engine::SyncTrigger::UserRequest)
        .await
        .unwrap();

    let requests = h.found_requests().await;
    assert_eq!(requests.len(), 2);
    let keys: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("idempotency-key").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(keys[0], keys[1]);
    let retry: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("x-retry-count").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(retry, vec!["0", "1"]);
    let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(body["location_id"], 1);
    assert_eq!(h.queue().count().unwrap(), 0);
}
