mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{hub_config, matched_pair};
use matchmaker::ServiceError;
use matchmaker::db::{MatchStore, MemoryStore};
use matchmaker::hub::{HubConfig, HubRegistry, HubState};
use matchmaker::models::{DialogKey, Match, UserId};

async fn registry_with_match(config: HubConfig) -> (Arc<HubRegistry>, UserId, UserId) {
    let store = Arc::new(MemoryStore::new());
    let a = UserId::new();
    let b = UserId::new();
    store
        .insert_match(&Match {
            key: DialogKey::new(a, b).unwrap(),
            formed_at: Utc::now(),
        })
        .await
        .unwrap();
    (Arc::new(HubRegistry::new(store, config)), a, b)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_yields_one_hub() {
    let (registry, a, b) = registry_with_match(hub_config()).await;

    let mut tasks = Vec::new();
    for i in 0..32 {
        let registry = registry.clone();
        let (x, y) = if i % 2 == 0 { (a, b) } else { (b, a) };
        tasks.push(tokio::spawn(async move { registry.acquire(x, y).await.unwrap().id() }));
    }
    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap());
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_acquire_rejects_self_pair() {
    let (registry, a, _) = registry_with_match(hub_config()).await;
    assert!(matches!(registry.acquire(a, a).await, Err(ServiceError::InvalidTarget)));
}

#[tokio::test(start_paused = true)]
async fn test_idle_hub_is_retired_after_grace() {
    let config = HubConfig {
        idle_grace: Duration::from_secs(30),
        ..hub_config()
    };
    let (registry, a, b) = registry_with_match(config).await;
    let key = DialogKey::new(a, b).unwrap();

    let hub = registry.acquire(a, b).await.unwrap();
    let attachment = hub.attach(a, None).await.unwrap();
    assert!(!registry.release_if_idle(key).await);

    drop(attachment);
    assert!(!registry.release_if_idle(key).await);

    // A reconnect inside the grace period keeps the hub.
    tokio::time::sleep(Duration::from_secs(20)).await;
    let attachment = hub.attach(a, None).await.unwrap();
    drop(attachment);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!registry.release_if_idle(key).await);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(registry.release_if_idle(key).await);
    assert!(registry.is_empty());
    assert_eq!(hub.state(), HubState::Retired);

    // The next acquire gets a fresh hub.
    let fresh = registry.acquire(a, b).await.unwrap();
    assert_ne!(fresh.id(), hub.id());
    assert_eq!(fresh.state(), HubState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_janitor_sweeps_closed_hubs() {
    let config = HubConfig {
        sweep_interval: Duration::from_secs(5),
        ..hub_config()
    };
    let (service, _, a, b) = matched_pair(config).await;
    let registry = service.registry().clone();
    let janitor = registry.spawn_janitor();

    let hub = service.get_dialog(a, b).await.unwrap();
    assert_eq!(registry.len(), 1);

    service.dislike(a, b).await.unwrap();
    assert_eq!(hub.state(), HubState::Closing);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(registry.is_empty());
    assert_eq!(hub.state(), HubState::Retired);

    janitor.abort();
}

#[tokio::test]
async fn test_history_and_chats_outlive_hubs() {
    let (service, _, a, b) = matched_pair(hub_config()).await;
    service.send(a, b, "remember me".into()).await.unwrap();

    service.dislike(a, b).await.unwrap();
    service.registry().sweep().await;
    assert!(service.registry().is_empty());

    let chats = service.get_all_chats(b).await.unwrap();
    assert_eq!(chats.iter().map(|p| p.id).collect::<Vec<_>>(), vec![a]);

    let history = service.history(b, a, None, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].payload, "remember me");
}
