mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{hub_config, service_with_users};
use matchmaker::ServiceError;
use matchmaker::models::{DialogKey, MatchEvent, UserId};

#[tokio::test]
async fn test_match_forms_in_either_order_and_not_before() {
    for reversed in [false, true] {
        let (service, _, users) = service_with_users(2, hub_config()).await;
        let (first, second) = if reversed {
            (users[1], users[0])
        } else {
            (users[0], users[1])
        };

        assert!(!service.like(first, second, false).await.unwrap());
        assert!(service.get_matches(first, None, None).await.unwrap().profiles.is_empty());
        assert!(matches!(
            service.get_dialog(first, second).await,
            Err(ServiceError::NoMatch)
        ));

        assert!(service.like(second, first, true).await.unwrap());
        let listing = service.get_matches(second, None, None).await.unwrap();
        assert_eq!(listing.profiles.len(), 1);
        assert_eq!(listing.profiles[0].id, first);
        assert!(service.get_dialog(first, second).await.is_ok());
    }
}

#[tokio::test]
async fn test_repeated_like_emits_one_formation() {
    let (service, store, users) = service_with_users(2, hub_config()).await;
    let (a, b) = (users[0], users[1]);
    let mut events = service.index().subscribe();

    service.like(a, b, false).await.unwrap();
    service.like(b, a, false).await.unwrap();
    service.like(b, a, false).await.unwrap();
    service.like(a, b, false).await.unwrap();

    assert!(matches!(events.try_recv(), Ok(MatchEvent::Formed(_))));
    assert!(events.try_recv().is_err());

    // Every decision is still in the log.
    assert_eq!(store.swipe_log().await.len(), 4);
}

#[tokio::test]
async fn test_retraction_before_reciprocation_never_matches() {
    let (service, _, users) = service_with_users(2, hub_config()).await;
    let (a, b) = (users[0], users[1]);
    let mut events = service.index().subscribe();

    service.like(a, b, false).await.unwrap();
    service.dislike(a, b).await.unwrap();
    assert!(!service.like(b, a, false).await.unwrap());

    assert!(events.try_recv().is_err());
    assert!(matches!(
        service.get_dialog(a, b).await,
        Err(ServiceError::NoMatch)
    ));
}

#[tokio::test]
async fn test_dislike_dissolves_and_closes_dialog() {
    let (service, _, users) = service_with_users(2, hub_config()).await;
    let (a, b) = (users[0], users[1]);
    service.like(a, b, false).await.unwrap();
    service.like(b, a, false).await.unwrap();

    let hub = service.get_dialog(a, b).await.unwrap();
    assert_eq!(hub.send(a, "hi").await.unwrap().sequence, 1);

    service.dislike(b, a).await.unwrap();
    assert!(matches!(hub.send(a, "hello?").await, Err(ServiceError::DialogClosed)));
    assert!(service.get_matches(a, None, None).await.unwrap().profiles.is_empty());
}

#[tokio::test]
async fn test_relike_after_dislike_reforms_match_and_keeps_numbering() {
    let (service, _, users) = service_with_users(2, hub_config()).await;
    let (a, b) = (users[0], users[1]);
    service.like(a, b, false).await.unwrap();
    service.like(b, a, false).await.unwrap();
    service.send(a, b, "one".into()).await.unwrap();

    service.dislike(a, b).await.unwrap();
    assert!(service.like(a, b, false).await.unwrap());

    let message = service.send(b, a, "two".into()).await.unwrap();
    assert_eq!(message.sequence, 2);
}

#[tokio::test]
async fn test_self_swipe_is_invalid() {
    let (service, store, users) = service_with_users(1, hub_config()).await;
    let me = users[0];
    assert!(matches!(service.like(me, me, false).await, Err(ServiceError::InvalidTarget)));
    assert!(matches!(service.dislike(me, me).await, Err(ServiceError::InvalidTarget)));
    assert!(store.swipe_log().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reciprocal_likes_form_exactly_one_match() {
    for _ in 0..20 {
        let (service, _, users) = service_with_users(2, hub_config()).await;
        let service = Arc::new(service);
        let (a, b) = (users[0], users[1]);
        let mut events = service.index().subscribe();

        let left = {
            let service = service.clone();
            tokio::spawn(async move { service.like(a, b, false).await.unwrap() })
        };
        let right = {
            let service = service.clone();
            tokio::spawn(async move { service.like(b, a, false).await.unwrap() })
        };
        let formed = [left.await.unwrap(), right.await.unwrap()];

        assert_eq!(formed.iter().filter(|f| **f).count(), 1);
        let key = DialogKey::new(a, b).unwrap();
        assert!(matches!(events.try_recv(), Ok(MatchEvent::Formed(m)) if m.key == key));
        assert!(events.try_recv().is_err());
    }
}

#[tokio::test]
async fn test_match_pages_are_stable_under_new_matches() {
    let (service, _, users) = service_with_users(8, hub_config()).await;
    let me = users[0];
    for &other in &users[1..6] {
        service.like(me, other, false).await.unwrap();
        service.like(other, me, false).await.unwrap();
    }

    let first = service.get_matches(me, Some(2), None).await.unwrap();
    assert_eq!(first.profiles.len(), 2);
    let mut seen: Vec<UserId> = first.profiles.iter().map(|p| p.id).collect();

    // New matches arrive while the client is paging.
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    for &other in &users[6..8] {
        service.like(me, other, false).await.unwrap();
        service.like(other, me, false).await.unwrap();
    }

    let mut cursor = first.next_cursor;
    while let Some(current) = cursor {
        let page = service.get_matches(me, Some(2), Some(&current)).await.unwrap();
        seen.extend(page.profiles.iter().map(|p| p.id));
        cursor = page.next_cursor;
    }

    let unique: HashSet<UserId> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len(), "a match was returned twice");
    let original: HashSet<UserId> = users[1..6].iter().copied().collect();
    assert_eq!(unique, original);
}

#[tokio::test]
async fn test_listings_reflect_current_edges_only() {
    let (service, _, users) = service_with_users(3, hub_config()).await;
    let me = users[0];
    service.like(me, users[1], false).await.unwrap();
    service.like(me, users[2], false).await.unwrap();
    service.dislike(me, users[1]).await.unwrap();

    let liked: Vec<UserId> = service
        .list_liked(me, None, None)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(liked, vec![users[2]]);

    let disliked: Vec<UserId> = service
        .list_disliked(me, None, None)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(disliked, vec![users[1]]);

    let second_page = service.list_liked(me, Some(1), Some(1)).await.unwrap();
    assert!(second_page.is_empty());
}
