//! Surviving restarts, and failing loudly when storage does not.

use std::sync::Arc;

use waypoint_engine::{
    ForegroundContext, NoWake, REJECTED_MESSAGE, RecordingNotifier, STORAGE_FAILURE_MESSAGE,
    SyncCore,
};
use waypoint_store::{FileStateStore, ListOrder, QueueStore, StateStore};
use waypoint_types::{LocationId, NotifyLevel, TeamId};

use crate::common::{GAME, Harness, mount_found, passed, state};

#[tokio::test]
async fn unsynced_progress_survives_a_reload() {
    let h = Harness::start().await;

    let before = {
        let mut page = h.page(state(&[1, 2, 3])).context.with_online(false);
        page.submit_validation(passed(1)).await.unwrap();
        page.submit_validation(passed(2)).await.unwrap();
        page.into_state()
    };

    // A new process: fresh store handles over the same files.
    let reloaded = h.states().load(GAME).unwrap().unwrap();
    assert_eq!(reloaded, before);
    assert_eq!(reloaded.unconfirmed(), vec![LocationId::new(1), LocationId::new(2)]);
    assert_eq!(reloaded.current_index(), 2);

    let queued = h.queue().list_all(ListOrder::Created).unwrap();
    let locations: Vec<_> = queued
        .iter()
        .filter_map(|update| update.mutation.location_id())
        .collect();
    assert_eq!(locations, vec![LocationId::new(1), LocationId::new(2)]);
}

#[tokio::test]
async fn offline_team_switch_survives_a_reload() {
    let h = Harness::start().await;
    let mut page = h.page(state(&[1, 2])).context.with_online(false);
    page.submit_validation(passed(1)).await.unwrap();
    page.switch_team(TeamId::new(9)).await.unwrap();

    let reloaded = h.states().load(GAME).unwrap().unwrap();
    assert_eq!(reloaded.team_id, TeamId::new(9));
    assert_eq!(reloaded.current_index(), 0);

    let page = h.page(reloaded).context;
    // Neither the old team's find nor the switch itself targets the new team.
    assert_eq!(page.refresh_pending_indicator().unwrap(), 0);
    assert_eq!(h.queue().count().unwrap(), 2);
}

#[tokio::test]
async fn state_write_failure_is_escalated() {
    let h = Harness::start().await;
    // A regular file where the state directory should be.
    let blocked = h.dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"").unwrap();

    let core = SyncCore::new(
        h.queue(),
        Arc::new(FileStateStore::new(&blocked)),
        h.transport(),
        h.clock.clone(),
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let mut page =
        ForegroundContext::new(core, state(&[1]), notifier.clone(), Arc::new(NoWake))
            .with_online(false);

    let err = page.submit_validation(passed(1)).await.unwrap_err();
    assert!(err.is_storage());
    assert_eq!(
        notifier.messages(),
        vec![(STORAGE_FAILURE_MESSAGE.to_string(), NotifyLevel::Error)]
    );
    assert_eq!(h.queue().count().unwrap(), 0);
}

#[tokio::test]
async fn state_write_failure_during_reconnect_still_reports_the_rejection() {
    let h = Harness::start().await;
    mount_found(&h.server, 409).await;

    let replica = {
        let mut page = h.page(state(&[1, 2])).context.with_online(false);
        page.submit_validation(passed(2)).await.unwrap();
        page.into_state()
    };

    let blocked = h.dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"").unwrap();
    let core = SyncCore::new(
        h.queue(),
        Arc::new(FileStateStore::new(&blocked)),
        h.transport(),
        h.clock.clone(),
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let mut page = ForegroundContext::new(core, replica, notifier.clone(), Arc::new(NoWake))
        .with_online(false);

    let err = page.set_online(true).await.unwrap_err();
    assert!(err.is_storage());
    assert_eq!(h.queue().count().unwrap(), 0);
    assert!(!page.state().location(LocationId::new(2)).unwrap().found);
    assert_eq!(
        notifier.messages(),
        vec![
            (REJECTED_MESSAGE.to_string(), NotifyLevel::Error),
            (STORAGE_FAILURE_MESSAGE.to_string(), NotifyLevel::Error),
        ]
    );
}
