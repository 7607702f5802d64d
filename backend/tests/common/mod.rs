#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use matchmaker::db::{MemoryStore, RetryPolicy};
use matchmaker::hub::{Attachment, HubConfig, HubEvent};
use matchmaker::models::{ChatMessage, ProfileSummary, UserId};
use matchmaker::services::DatingService;

pub fn hub_config() -> HubConfig {
    HubConfig {
        retry: RetryPolicy::none(),
        ..HubConfig::default()
    }
}

pub async fn service_with_users(
    n: usize,
    config: HubConfig,
) -> (DatingService, Arc<MemoryStore>, Vec<UserId>) {
    let store = Arc::new(MemoryStore::new());
    let mut users = Vec::with_capacity(n);
    for i in 0..n {
        let id = UserId::new();
        store
            .put_profile(ProfileSummary {
                id,
                display_name: format!("user-{i}"),
                bio: None,
                avatar_url: Some(format!("https://img.example/{i}.png")),
            })
            .await;
        users.push(id);
    }
    (DatingService::new(store.clone(), config), store, users)
}

/// Two matched users and their service.
pub async fn matched_pair(config: HubConfig) -> (DatingService, Arc<MemoryStore>, UserId, UserId) {
    let (service, store, users) = service_with_users(2, config).await;
    let (a, b) = (users[0], users[1]);
    service.like(a, b, false).await.unwrap();
    assert!(service.like(b, a, false).await.unwrap());
    (service, store, a, b)
}

/// Next chat message on the attachment, failing the test after a few seconds.
pub async fn next_message(attachment: &mut Attachment) -> ChatMessage {
    match tokio::time::timeout(Duration::from_secs(5), attachment.next_event()).await {
        Ok(Some(HubEvent::Message(message))) => message,
        other => panic!("expected a message, got {:?}", other.map(|e| e.is_some())),
    }
}

pub async fn next_messages(attachment: &mut Attachment, n: usize) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(next_message(attachment).await);
    }
    out
}

pub fn sequences(messages: &[ChatMessage]) -> Vec<u64> {
    messages.iter().map(|m| m.sequence).collect()
}
