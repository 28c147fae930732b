//! Background conversation task tests
//!
//! Both users run a spawned conversation against the same store and observe
//! each other through their published views.

use pretty_assertions::assert_eq;

use crate::common::*;
use shadowchat::client::messaging::{spawn_conversation, ConversationHandle, ConversationSynchronizer};
use shadowchat::client::{ClientError, SyncState};
use shadowchat::shared::AppConfig;

fn spawn(user: &TestUser, peer: &TestUser, config: AppConfig) -> ConversationHandle {
    let sync = ConversationSynchronizer::new(user.backend(), config, user.id, peer.id);
    let (handle, _task) = spawn_conversation(sync);
    handle
}

#[tokio::test]
async fn test_two_users_exchange_messages() {
    let (store, alice, bob) = alice_and_bob().await;
    let alice_view = spawn(&alice, &bob, test_config());
    let bob_view = spawn(&bob, &alice, test_config());
    assert_eq!(within("alice ready", alice_view.ready()).await.ok(), Some(SyncState::Synced));
    assert_eq!(within("bob ready", bob_view.ready()).await.ok(), Some(SyncState::Synced));

    let sent = crate::assert_ok!(alice_view.send("  hi bob  ").await).expect("written");
    assert_eq!(sent.content, "hi bob");

    let seen = crate::assert_ok!(
        within("bob sees message", bob_view.wait_for(|v| !v.messages.is_empty())).await
    );
    assert_eq!(contents(&seen.messages), vec!["hi bob"]);

    // Bob's view is open, so the message is marked read and alice sees it.
    let read = crate::assert_ok!(
        within(
            "alice sees read receipt",
            alice_view.wait_for(|v| v.messages.first().map(|m| m.is_read).unwrap_or(false)),
        )
        .await
    );
    assert_eq!(read.messages.len(), 1);
    assert!(store.message(sent.id).expect("row").is_read);

    crate::assert_ok!(alice_view.close().await);
    crate::assert_ok!(bob_view.close().await);
}

#[tokio::test]
async fn test_typing_indicator_round_trip() {
    let (store, alice, bob) = alice_and_bob().await;
    let alice_view = spawn(&alice, &bob, test_config());
    let bob_view = spawn(&bob, &alice, test_config());
    within("alice ready", alice_view.ready()).await.ok();
    within("bob ready", bob_view.ready()).await.ok();

    for text in ["h", "he", "hel"] {
        crate::assert_ok!(alice_view.compose_changed(text).await);
    }
    crate::assert_ok!(within("bob sees typing", bob_view.wait_for(|v| v.peer_typing)).await);

    crate::assert_ok!(alice_view.compose_changed("").await);
    crate::assert_ok!(within("typing cleared", bob_view.wait_for(|v| !v.peer_typing)).await);

    assert_eq!(
        typing_writes(&store),
        vec![(alice.id, bob.id, true), (alice.id, bob.id, false)]
    );

    crate::assert_ok!(alice_view.close().await);
    crate::assert_ok!(bob_view.close().await);
}

#[tokio::test]
async fn test_send_clears_typing() {
    let (store, alice, bob) = alice_and_bob().await;
    let view = spawn(&alice, &bob, test_config());
    within("ready", view.ready()).await.ok();

    crate::assert_ok!(view.compose_changed("on my way").await);
    crate::assert_ok!(view.send("on my way").await);
    assert!(!store.typing(alice.id, bob.id).expect("row").is_typing);
    crate::assert_ok!(view.close().await);
}

#[tokio::test]
async fn test_failed_load_is_reported_and_retried() {
    let (store, alice, bob) = alice_and_bob().await;
    bob.send_to(alice.id, "waiting for you").await;

    store.fail_next_fetches(1);
    let view = spawn(&alice, &bob, manual_read_config());
    let state = crate::assert_ok!(within("first load", view.ready()).await);
    assert!(matches!(state, SyncState::Failed(_)));
    assert!(view.view().messages.is_empty());

    crate::assert_ok!(view.retry().await);
    let synced = crate::assert_ok!(
        within("synced view", view.wait_for(|v| v.state == SyncState::Synced)).await
    );
    assert_eq!(contents(&synced.messages), vec!["waiting for you"]);
    crate::assert_ok!(view.close().await);
}

#[tokio::test]
async fn test_closed_handle_rejects_commands() {
    let (_store, alice, bob) = alice_and_bob().await;
    let view = spawn(&alice, &bob, test_config());
    within("ready", view.ready()).await.ok();

    crate::assert_ok!(view.close().await);
    crate::assert_err!(view.send("too late").await, ClientError::Closed(_));
}

#[tokio::test]
async fn test_dropping_every_handle_clears_typing() {
    let (store, alice, bob) = alice_and_bob().await;
    let sync = ConversationSynchronizer::new(alice.backend(), test_config(), alice.id, bob.id);
    let (view, task) = spawn_conversation(sync);
    within("ready", view.ready()).await.ok();
    crate::assert_ok!(view.compose_changed("x").await);

    drop(view);
    within("task exit", task).await.expect("task panicked");
    assert!(!store.typing(alice.id, bob.id).expect("row").is_typing);
}

#[tokio::test]
async fn test_subscribe_failure_settles_and_retry_reopens() {
    let (store, alice, bob) = alice_and_bob().await;
    store.fail_next_subscribes(1);

    let view = spawn(&alice, &bob, manual_read_config());
    let state = crate::assert_ok!(within("first open", view.ready()).await);
    assert!(matches!(state, SyncState::Failed(_)));

    crate::assert_ok!(view.retry().await);
    crate::assert_ok!(
        within("synced view", view.wait_for(|v| v.state == SyncState::Synced)).await
    );

    // Live delivery works after the streams were reopened.
    bob.send_to(alice.id, "after retry").await;
    let seen = crate::assert_ok!(
        within("live message", view.wait_for(|v| !v.messages.is_empty())).await
    );
    assert_eq!(contents(&seen.messages), vec!["after retry"]);
    crate::assert_ok!(view.close().await);
}
