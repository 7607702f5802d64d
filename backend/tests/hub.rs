mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use common::{hub_config, matched_pair, next_message, next_messages, sequences};
use matchmaker::ServiceError;
use matchmaker::db::RetryPolicy;
use matchmaker::hub::{HubConfig, HubEvent, HubState};
use matchmaker::models::UserId;

#[tokio::test]
async fn test_offline_peer_catches_up_then_receives_live() {
    let (service, _, a, b) = matched_pair(hub_config()).await;

    let mut alice = service.open_dialog(a, b, None).await.unwrap();
    let hi = alice.send("hi").await.unwrap();
    assert_eq!(hi.sequence, 1);

    let mut bob = service.open_dialog(b, a, None).await.unwrap();
    let first = next_message(&mut bob).await;
    assert_eq!((first.sequence, first.payload.as_str()), (1, "hi"));

    alice.send("bye").await.unwrap();
    let second = next_message(&mut bob).await;
    assert_eq!((second.sequence, second.payload.as_str(), second.sender), (2, "bye", a));

    // The sender sees its own messages with the same numbers.
    assert_eq!(sequences(&next_messages(&mut alice, 2).await), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_are_numbered_identically_for_both_sides() {
    let (service, _, a, b) = matched_pair(hub_config()).await;
    let mut alice = service.open_dialog(a, b, None).await.unwrap();
    let mut bob = service.open_dialog(b, a, None).await.unwrap();
    let hub = service.get_dialog(a, b).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..20 {
        for sender in [a, b] {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                hub.send(sender, format!("{sender}-{i}")).await.unwrap().sequence
            }));
        }
    }
    let mut assigned = BTreeSet::new();
    for task in tasks {
        assert!(assigned.insert(task.await.unwrap()));
    }
    assert_eq!(assigned, (1..=40).collect::<BTreeSet<u64>>());

    let seen_by_alice = next_messages(&mut alice, 40).await;
    let seen_by_bob = next_messages(&mut bob, 40).await;
    assert_eq!(sequences(&seen_by_alice), (1..=40).collect::<Vec<_>>());
    assert_eq!(seen_by_alice, seen_by_bob);
}

#[tokio::test]
async fn test_reconnect_replays_after_last_ack() {
    let (service, _, a, b) = matched_pair(hub_config()).await;
    let hub = service.get_dialog(a, b).await.unwrap();

    let mut bob = service.open_dialog(b, a, None).await.unwrap();
    for i in 1..=5 {
        hub.send(a, format!("m{i}")).await.unwrap();
    }
    let first = next_messages(&mut bob, 5).await;
    bob.ack(3);
    drop(bob);

    // The hub remembers the ack.
    let mut bob = service.open_dialog(b, a, None).await.unwrap();
    let replayed = next_messages(&mut bob, 2).await;
    assert_eq!(sequences(&replayed), vec![4, 5]);
    drop(bob);

    // An explicit resume point wins, and dedup on the client side yields
    // every message exactly once.
    let mut bob = service.open_dialog(b, a, Some(2)).await.unwrap();
    let again = next_messages(&mut bob, 3).await;
    assert_eq!(sequences(&again), vec![3, 4, 5]);

    let mut received: Vec<u64> = sequences(&first);
    received.extend(sequences(&again));
    let unique: BTreeSet<u64> = received.into_iter().collect();
    assert_eq!(unique, (1..=5).collect::<BTreeSet<u64>>());
}

#[tokio::test]
async fn test_attach_rejects_outsiders() {
    let (service, _, a, b) = matched_pair(hub_config()).await;
    let hub = service.get_dialog(a, b).await.unwrap();
    let stranger = UserId::new();

    assert!(matches!(hub.attach(stranger, None).await, Err(ServiceError::NotParticipant)));
    assert!(matches!(hub.send(stranger, "hey").await, Err(ServiceError::NotParticipant)));
    assert_eq!(hub.status().attached, 0);
}

#[tokio::test]
async fn test_reattach_replaces_previous_connection() {
    let (service, _, a, b) = matched_pair(hub_config()).await;
    let mut old = service.open_dialog(a, b, None).await.unwrap();
    let mut new = service.open_dialog(a, b, None).await.unwrap();

    let hub = service.get_dialog(a, b).await.unwrap();
    assert_eq!(hub.status().attached, 1);

    let ended = tokio::time::timeout(Duration::from_secs(5), old.next_event()).await.unwrap();
    assert!(ended.is_none());

    hub.send(b, "still here").await.unwrap();
    assert_eq!(next_message(&mut new).await.sequence, 1);

    // Dropping the replaced attachment does not detach the new one.
    drop(old);
    hub.send(b, "and here").await.unwrap();
    assert_eq!(next_message(&mut new).await.sequence, 2);
    assert_eq!(hub.status().attached, 1);
}

#[tokio::test]
async fn test_dissolution_closes_attached_connections() {
    let (service, _, a, b) = matched_pair(hub_config()).await;
    let mut bob = service.open_dialog(b, a, None).await.unwrap();

    service.dislike(a, b).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), bob.next_event()).await.unwrap();
    assert_eq!(event, Some(HubEvent::Closed));
    assert!(bob.next_event().await.is_none());
    assert!(matches!(bob.send("anyone?").await, Err(ServiceError::DialogClosed)));
    assert_eq!(bob.hub().state(), HubState::Closing);
}

#[tokio::test]
async fn test_slow_reader_gets_everything_in_order() {
    let config = HubConfig {
        outbound_queue: 2,
        replay_batch: 3,
        ..hub_config()
    };
    let (service, _, a, b) = matched_pair(config).await;
    let hub = service.get_dialog(a, b).await.unwrap();
    let mut bob = service.open_dialog(b, a, None).await.unwrap();

    for i in 1..=10 {
        hub.send(a, format!("m{i}")).await.unwrap();
    }

    let received = next_messages(&mut bob, 10).await;
    assert_eq!(sequences(&received), (1..=10).collect::<Vec<_>>());

    hub.send(a, "live again").await.unwrap();
    assert_eq!(next_message(&mut bob).await.sequence, 11);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_connection_is_dropped() {
    let config = HubConfig {
        outbound_queue: 1,
        unresponsive_after: Duration::from_secs(2),
        ..hub_config()
    };
    let (service, _, a, b) = matched_pair(config).await;
    let hub = service.get_dialog(a, b).await.unwrap();
    let mut bob = service.open_dialog(b, a, None).await.unwrap();

    for i in 1..=3 {
        hub.send(a, format!("m{i}")).await.unwrap();
    }
    assert_eq!(hub.status().attached, 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(hub.status().attached, 0);

    // Whatever was queued is still readable, then the stream ends.
    assert_eq!(next_message(&mut bob).await.sequence, 1);
    assert!(bob.next_event().await.is_none());

    // Reconnecting replays what was missed.
    let mut bob = service.open_dialog(b, a, Some(1)).await.unwrap();
    assert_eq!(next_message(&mut bob).await.sequence, 2);
}

#[tokio::test]
async fn test_transient_append_failures_are_retried() {
    let config = HubConfig {
        retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
        ..hub_config()
    };
    let (service, store, a, b) = matched_pair(config).await;
    let hub = service.get_dialog(a, b).await.unwrap();

    store.fail_next_appends(2);
    assert_eq!(hub.send(a, "eventually").await.unwrap().sequence, 1);

    store.fail_next_appends(3);
    assert!(matches!(hub.send(a, "lost").await, Err(ServiceError::Store(_))));

    // A failed send does not burn a sequence number.
    assert_eq!(hub.send(a, "next").await.unwrap().sequence, 2);
    let history = service.history(a, b, None, None).await.unwrap();
    assert_eq!(sequences(&history), vec![1, 2]);
}

#[tokio::test]
async fn test_send_without_retries_fails_fast() {
    let (service, store, a, b) = matched_pair(hub_config()).await;

    store.fail_next_appends(1);
    assert!(matches!(
        service.send(a, b, "first".into()).await,
        Err(ServiceError::Store(_))
    ));
    assert_eq!(service.send(a, b, "second".into()).await.unwrap().sequence, 1);
}
