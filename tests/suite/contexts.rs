//! Foreground and background contexts sharing one durable queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use waypoint_engine::{
    BackgroundContext, Bridge, ContextMessage, ForegroundContext, PageCommand, RecordingNotifier,
    WakeRegistrar, wake_tag,
};
use waypoint_store::QueueStore;
use waypoint_types::LocationId;

use crate::common::{Harness, TEAM, mount_found, mount_state, passed, state};

#[tokio::test]
async fn two_pages_deliver_each_entry_exactly_once() {
    let h = Harness::start().await;
    mount_found(&h.server, 200).await;
    mount_state(&h.server, 0, &[]).await;

    let mut first = h.page(state(&[1, 2])).context.with_online(false);
    let mut second = h.page(state(&[1, 2])).context.with_online(false);
    assert_ne!(first.claim_owner(), second.claim_owner());

    first.submit_validation(passed(1)).await.unwrap();
    second.submit_validation(passed(2)).await.unwrap();
    assert_eq!(h.queue().count().unwrap(), 2);

    let (a, b) = tokio::join!(first.set_online(true), second.set_online(true));
    a.unwrap();
    b.unwrap();

    assert_eq!(h.queue().count().unwrap(), 0);
    let mut delivered = h.found_locations().await;
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 2]);
}

#[tokio::test]
async fn background_wake_confirms_the_open_page() {
    let h = Harness::start().await;
    mount_found(&h.server, 200).await;

    let bridge = Bridge::new();
    let notifier = Arc::new(RecordingNotifier::new());
    let registrar: Arc<dyn WakeRegistrar> = bridge.wake();
    let mut page = ForegroundContext::new(h.core(), state(&[1, 2]), notifier.clone(), registrar)
        .with_online(false);
    let mut inbox = bridge.subscribe();

    page.submit_validation(passed(1)).await.unwrap();
    assert_eq!(bridge.wake().pending(), vec![wake_tag(Some(TEAM))]);

    let background = BackgroundContext::new(&h.core(), &bridge);
    let tags = bridge.wake().take();
    let report = background.handle_wake(tags).await.unwrap().unwrap();
    assert_eq!(report.drain.flushed(), 1);
    assert_eq!(report.remaining, 0);

    while let Ok(message) = inbox.try_recv() {
        page.handle_message(&message).unwrap();
    }
    let location = page.state().location(LocationId::new(1)).unwrap();
    assert!(location.found && !location.local_only);
    assert_eq!(notifier.last_pending(), Some(0));
}

#[tokio::test]
async fn background_rejection_reaches_the_page() {
    let h = Harness::start().await;
    mount_found(&h.server, 409).await;

    let bridge = Bridge::new();
    let registrar: Arc<dyn WakeRegistrar> = bridge.wake();
    let mut page = ForegroundContext::new(
        h.core(),
        state(&[1, 2]),
        Arc::new(RecordingNotifier::new()),
        registrar,
    )
    .with_online(false);
    let mut inbox = bridge.subscribe();
    page.submit_validation(passed(2)).await.unwrap();

    BackgroundContext::new(&h.core(), &bridge)
        .handle_wake(Vec::new())
        .await
        .unwrap();

    let messages: Vec<_> = std::iter::from_fn(|| inbox.try_recv().ok()).collect();
    assert!(matches!(
        messages[0],
        ContextMessage::UpdateRejected { location_id: Some(loc), .. } if loc == LocationId::new(2)
    ));
    for message in &messages {
        page.handle_message(message).unwrap();
    }
    assert!(!page.state().location(LocationId::new(2)).unwrap().found);
    assert_eq!(h.queue().count().unwrap(), 0);
}

#[tokio::test]
async fn running_contexts_converge() {
    let h = Harness::start().await;
    mount_found(&h.server, 200).await;
    mount_state(&h.server, 2, &[(1, true), (2, true)]).await;

    let bridge = Bridge::new();
    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = tokio::spawn(
        BackgroundContext::new(&h.core(), &bridge)
            .with_budget(Duration::from_secs(5))
            .run(stop_rx),
    );

    let registrar: Arc<dyn WakeRegistrar> = bridge.wake();
    let page = ForegroundContext::new(
        h.core(),
        state(&[1, 2]),
        Arc::new(RecordingNotifier::new()),
        registrar,
    );
    let (commands_tx, commands_rx) = mpsc::channel(8);
    let (online_tx, online_rx) = watch::channel(false);
    let messages: broadcast::Receiver<ContextMessage> = bridge.subscribe();
    let page_task = tokio::spawn(page.run(commands_rx, online_rx, messages));

    commands_tx
        .send(PageCommand::Submit(passed(1)))
        .await
        .unwrap();
    commands_tx
        .send(PageCommand::Submit(passed(2)))
        .await
        .unwrap();

    // Wait until the background context has emptied the queue.
    let queue = h.queue();
    for _ in 0..200 {
        if queue.count().unwrap() == 0 && !h.found_requests().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    online_tx.send(true).unwrap();
    commands_tx.send(PageCommand::Sync).await.unwrap();
    drop(commands_tx);

    let final_state = page_task.await.unwrap();
    stop_tx.send(true).unwrap();
    worker.await.unwrap();

    assert_eq!(queue.count().unwrap(), 0);
    assert!(final_state.is_complete());
    assert!(final_state.unconfirmed().is_empty());
    assert_eq!(final_state.current_index(), 2);
    let mut delivered = h.found_locations().await;
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 2]);
}
