//! End-to-end dispatch cycles over the in-memory store and scripted connector.

use courier::delivery::{Deliverer, RetryPolicy, CONTACT_ADD_FAILED};
use courier::dispatch::{DispatchConfig, Dispatcher};
use courier::platform::{AccountId, MockConnector, PlatformError};
use courier::queue::{JobRecord, JobStatus, MemoryQueueStore, QueueStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn dispatcher(store: &MemoryQueueStore, connector: &MockConnector) -> Dispatcher {
    Dispatcher::new(
        Arc::new(store.clone()),
        Deliverer::new(Arc::new(connector.clone()), RetryPolicy::default()),
        DispatchConfig::default(),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn test_pending_message_is_delivered_and_marked_sent() {
    let store = MemoryQueueStore::new();
    let connector = MockConnector::new();
    let id = store.enqueue("A", "B", "hi");

    dispatcher(&store, &connector).run_once().await.unwrap();

    let row = store.get(id).unwrap();
    assert_eq!(row.status, Some(JobStatus::Sent));
    assert!(row.sent_at.is_some());
    assert_eq!(row.error_text, None);

    let sent = connector.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].sender, AccountId::from("A"));
    assert_eq!(sent[0].recipient, AccountId::from("B"));
    assert_eq!(sent[0].text, "hi");
}

#[tokio::test(start_paused = true)]
async fn test_mixed_failures_in_one_cycle() {
    let store = MemoryQueueStore::new();
    let connector = MockConnector::new();
    connector
        // job 1: unknown recipient, registration works, resend works
        .script_send(Err(PlatformError::UnknownPeer("C".into())))
        .script_send(Ok(()))
        // job 2: cool-down once, then delivered
        .script_send(Err(PlatformError::CoolDown { seconds: 2 }))
        .script_send(Ok(()))
        // job 3: unknown recipient and the platform refuses the contact
        .script_send(Err(PlatformError::UnknownPeer("D".into())))
        .script_register(Ok(()))
        .script_register(Err(PlatformError::ContactAddMissing("refused".into())))
        // job 4: bad chat
        .script_send(Err(PlatformError::InvalidChat("gone".into())));

    let ids = [
        store.enqueue("A", "C", "one"),
        store.enqueue("A", "B", "two"),
        store.enqueue("A", "D", "three"),
        store.enqueue("A", "E", "four"),
    ];
    let malformed = store.insert(JobRecord {
        sender: Some(" ".into()),
        recipient: Some("B".into()),
        text: Some("five".into()),
        ..Default::default()
    });

    let report = dispatcher(&store, &connector).run_once().await.unwrap();

    assert_eq!(report.fetched, 5);
    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.malformed, 1);

    assert_eq!(store.get(ids[0]).unwrap().status, Some(JobStatus::Sent));
    assert_eq!(store.get(ids[1]).unwrap().status, Some(JobStatus::Sent));
    assert_eq!(
        store.get(ids[2]).unwrap().error_text.as_deref(),
        Some(CONTACT_ADD_FAILED)
    );
    assert_eq!(
        store.get(ids[3]).unwrap().error_text.as_deref(),
        Some("CHAT_ID_INVALID: gone")
    );
    assert!(store
        .get(malformed)
        .unwrap()
        .error_text
        .unwrap()
        .contains("missing sender"));

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.sent, 2);
    assert_eq!(counts.failed, 3);
    assert_eq!(connector.opens(), connector.closes());
}

#[tokio::test(start_paused = true)]
async fn test_status_conflicts_are_retried_by_writer() {
    let store = MemoryQueueStore::new();
    let connector = MockConnector::new();
    let id = store.enqueue("A", "B", "hi");
    store.conflict_times(4);

    dispatcher(&store, &connector).run_once().await.unwrap();

    assert_eq!(store.get(id).unwrap().status, Some(JobStatus::Sent));
    assert_eq!(store.update_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_status_leaves_job_pending_for_next_cycle() {
    let store = MemoryQueueStore::new();
    let connector = MockConnector::new();
    let id = store.enqueue("A", "B", "hi");
    store.always_conflict();

    let dispatcher = dispatcher(&store, &connector);
    let report = dispatcher.run_cycle().await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(store.get(id).unwrap().status, None);
    assert_eq!(store.update_calls(), 11);

    // Delivered again next cycle: at-least-once
    store.conflict_times(0);
    dispatcher.run_cycle().await.unwrap();
    assert_eq!(store.get(id).unwrap().status, Some(JobStatus::Sent));
    assert_eq!(connector.send_calls(), 2);

    dispatcher.run_once().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_skips_cycle_and_service_continues() {
    let store = MemoryQueueStore::new();
    let connector = MockConnector::new();
    let id = store.enqueue("A", "B", "hi");
    store.fail_fetch(true);
    let shutdown = CancellationToken::new();

    let dispatcher = Dispatcher::new(
        Arc::new(store.clone()),
        Deliverer::new(Arc::new(connector.clone()), RetryPolicy::default()),
        DispatchConfig {
            poll_interval: Duration::from_secs(60),
            update_queue_capacity: 8,
        },
        shutdown.clone(),
    );
    let handle = tokio::spawn(dispatcher.run());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.get(id).unwrap().status, None);
    store.fail_fetch(false);

    tokio::time::sleep(Duration::from_secs(60)).await;
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(store.get(id).unwrap().status, Some(JobStatus::Sent));
    assert_eq!(store.fetch_calls(), 2);
}
