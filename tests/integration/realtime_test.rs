//! Realtime delivery tests
//!
//! Subscriptions over the in-memory change bus: status sequence, filtering,
//! and the full reload that follows a dropped connection.

use pretty_assertions::assert_eq;

use crate::common::*;
use shadowchat::backend::Backend;
use shadowchat::client::messaging::{ConversationSynchronizer, SyncState};
use shadowchat::shared::{
    ChangeEvent, ChangeFilter, ConversationKey, Message, SubscriptionEvent, SubscriptionStatus,
};

#[tokio::test]
async fn test_subscription_reports_connected_then_changes() {
    let (_store, alice, bob) = alice_and_bob().await;
    let key = ConversationKey::new(alice.id, bob.id);
    let mut sub = crate::assert_ok!(
        alice
            .backend
            .subscribe_messages(ChangeFilter::Conversation(key))
            .await
    );

    let first = within("connected", sub.next()).await;
    assert_eq!(
        first,
        Some(SubscriptionEvent::Status(SubscriptionStatus::Connected))
    );

    let sent = bob.send_to(alice.id, "hi").await;
    let change = within("insert", sub.next()).await;
    assert_eq!(
        change,
        Some(SubscriptionEvent::Change(ChangeEvent::Insert(sent)))
    );
    sub.unsubscribe();
}

#[tokio::test]
async fn test_typing_filter_only_delivers_peer_rows() {
    let (_store, alice, bob) = alice_and_bob().await;
    let mut sub = crate::assert_ok!(
        alice
            .backend
            .subscribe_typing(ChangeFilter::eq("user_id", bob.id))
            .await
    );
    within("connected", sub.next()).await;

    alice.set_typing(bob.id, true).await;
    bob.set_typing(alice.id, true).await;

    match within("bob's typing row", sub.next()).await {
        Some(SubscriptionEvent::Change(ChangeEvent::Insert(row))) => {
            assert_eq!(row.user_id, bob.id);
            assert!(row.is_typing);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(sub.try_next().is_none());
}

#[tokio::test]
async fn test_messages_missed_while_offline_are_reloaded() {
    let (store, alice, bob) = alice_and_bob().await;
    let mut sync =
        ConversationSynchronizer::new(alice.backend(), manual_read_config(), alice.id, bob.id);
    crate::assert_ok!(sync.open().await);

    store.set_realtime_online(false);
    let missed = bob.send_to(alice.id, "sent during the outage").await;
    store.set_realtime_online(true);

    within("reload after reconnect", async {
        while !sync.timeline().contains(missed.id) {
            let incoming = sync.next_incoming().await.expect("stream ended");
            sync.process(incoming).await;
        }
    })
    .await;

    let view = sync.snapshot();
    assert_eq!(view.state, SyncState::Synced);
    assert_eq!(view.connection, Some(SubscriptionStatus::Resubscribed));
    assert_eq!(contents(&view.messages), vec!["sent during the outage"]);
}

#[tokio::test]
async fn test_peer_typing_is_observed() {
    let (_store, alice, bob) = alice_and_bob().await;
    let mut sync =
        ConversationSynchronizer::new(alice.backend(), test_config(), alice.id, bob.id);
    crate::assert_ok!(sync.open().await);
    assert!(!sync.peer_is_typing());

    bob.set_typing(alice.id, true).await;
    within("peer typing on", async {
        while !sync.peer_is_typing() {
            let incoming = sync.next_incoming().await.expect("stream ended");
            sync.process(incoming).await;
        }
    })
    .await;

    bob.set_typing(alice.id, false).await;
    within("peer typing off", async {
        while sync.peer_is_typing() {
            let incoming = sync.next_incoming().await.expect("stream ended");
            sync.process(incoming).await;
        }
    })
    .await;
}

#[tokio::test]
async fn test_injected_notification_without_row() {
    let (store, alice, bob) = alice_and_bob().await;
    let held = bob.send_to(alice.id, "to be removed").await;
    let mut sync =
        ConversationSynchronizer::new(alice.backend(), manual_read_config(), alice.id, bob.id);
    crate::assert_ok!(sync.open().await);

    // A bare delete carries only the id and cannot be filtered server-side.
    store.publish(ChangeEvent::<Message>::Delete {
        id: held.id,
        old: None,
    });
    within("bare delete", async {
        while sync.timeline().contains(held.id) {
            let incoming = sync.next_incoming().await.expect("stream ended");
            sync.process(incoming).await;
        }
    })
    .await;
    assert!(sync.messages().is_empty());
}
