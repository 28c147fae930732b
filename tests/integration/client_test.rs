//! ChatClient tests
//!
//! Sign-up, presence, the roster and conversation switching through the
//! public entry point, over the in-memory backend.

use pretty_assertions::assert_eq;

use crate::common::*;
use shadowchat::backend::{BackendError, MemoryStore};
use shadowchat::client::{ChatClient, ClientError, RosterState, SignUpForm, SyncState};
use shadowchat::shared::PresenceStatus;

async fn signed_in_client(store: &std::sync::Arc<MemoryStore>, username: &str) -> ChatClient {
    let client = client_for(store);
    crate::assert_ok!(client.sign_in(&email_for(username), TEST_PASSWORD).await);
    client
}

#[tokio::test]
async fn test_sign_up_validates_before_calling_backend() {
    let store = MemoryStore::new();
    let client = client_for(&store);

    let form = SignUpForm::new("neo", "neo@example.com", "secret1", "secret2");
    let err = client.sign_up(&form).await.unwrap_err();
    assert_eq!(err.field(), Some("confirm_password"));
    assert!(store.writes().is_empty());

    let form = SignUpForm::new("  neo ", "neo@example.com", "secret1", "secret1");
    let user = crate::assert_ok!(client.sign_up(&form).await);
    assert_eq!(store.profile(user.id).expect("profile").username, "neo");
    assert!(!client.auth_state().await.is_signed_in());
}

#[tokio::test]
async fn test_sign_up_with_taken_username() {
    let (store, _alice, _bob) = alice_and_bob().await;
    let client = client_for(&store);
    let form = SignUpForm::new("alice", "other@example.com", "secret1", "secret1");
    crate::assert_err!(
        client.sign_up(&form).await,
        ClientError::Backend(BackendError::Conflict { .. })
    );
}

#[tokio::test]
async fn test_presence_follows_sign_in_and_out() {
    let (store, alice, _bob) = alice_and_bob().await;
    let client = client_for(&store);

    crate::assert_err!(
        client.sign_in(&email_for("alice"), "wrong-password").await,
        ClientError::Backend(BackendError::Unauthenticated)
    );

    let before = store.profile(alice.id).expect("profile").last_seen;
    let profile = crate::assert_ok!(client.sign_in(&email_for("alice"), TEST_PASSWORD).await);
    assert_eq!(profile.status, PresenceStatus::Online);
    assert_eq!(client.profile().await.map(|p| p.id), Some(alice.id));

    crate::assert_ok!(client.sign_out().await);
    let after = store.profile(alice.id).expect("profile");
    assert_eq!(after.status, PresenceStatus::Offline);
    assert!(after.last_seen >= before);
    assert!(client.profile().await.is_none());
    crate::assert_err!(client.open_roster().await, ClientError::NotSignedIn);
}

#[tokio::test]
async fn test_roster_orders_and_refreshes_on_presence() {
    let (store, _alice, _bob) = alice_and_bob().await;
    TestUser::register(&store, "carol").await;
    let alice_client = signed_in_client(&store, "alice").await;

    let roster = crate::assert_ok!(alice_client.open_roster().await);
    let ready = crate::assert_ok!(
        within("roster ready", roster.wait_for(|v| v.state == RosterState::Ready)).await
    );
    let names: Vec<&str> = ready.profiles.iter().map(|p| p.username.as_str()).collect();
    assert_eq!(names, vec!["bob", "carol"]);

    let _carol_client = signed_in_client(&store, "carol").await;
    let refreshed = crate::assert_ok!(
        within(
            "carol online",
            roster.wait_for(|v| v.profiles.first().map(|p| p.is_online()).unwrap_or(false)),
        )
        .await
    );
    let names: Vec<&str> = refreshed.profiles.iter().map(|p| p.username.as_str()).collect();
    assert_eq!(names, vec!["carol", "bob"]);

    alice_client.close_roster().await;
    crate::assert_err!(roster.retry().await, ClientError::Closed(_));
}

#[tokio::test]
async fn test_opening_a_conversation_closes_the_previous_one() {
    let (store, _alice, bob) = alice_and_bob().await;
    let carol = TestUser::register(&store, "carol").await;
    let client = signed_in_client(&store, "alice").await;
    let alice_id = client.profile().await.expect("signed in").id;

    let with_bob = crate::assert_ok!(client.open_conversation(bob.id).await);
    within("bob conversation", with_bob.ready()).await.ok();
    crate::assert_ok!(with_bob.compose_changed("typing to bob").await);
    assert!(store.typing(alice_id, bob.id).expect("row").is_typing);

    let with_carol = crate::assert_ok!(client.open_conversation(carol.id).await);
    assert_eq!(client.active_peer().await, Some(carol.id));
    assert!(!store.typing(alice_id, bob.id).expect("row").is_typing);
    assert!(with_bob.send("stale handle").await.is_err());

    let view = crate::assert_ok!(within("carol conversation", with_carol.wait_for(|v| v.state == SyncState::Synced)).await);
    assert_eq!(view.peer.map(|p| p.username), Some("carol".to_string()));

    client.close_conversation().await;
    assert_eq!(client.active_peer().await, None);
}

#[tokio::test]
async fn test_conversation_with_unknown_peer_fails() {
    let (store, _alice, _bob) = alice_and_bob().await;
    let client = signed_in_client(&store, "alice").await;
    crate::assert_err!(
        client.open_conversation(uuid::Uuid::new_v4()).await,
        ClientError::Backend(BackendError::NotFound { .. })
    );
    assert_eq!(client.active_peer().await, None);
}

#[tokio::test]
async fn test_conversation_summaries() {
    let (store, alice, bob) = alice_and_bob().await;
    let carol = TestUser::register(&store, "carol").await;
    bob.send_to(alice.id, "one").await;
    bob.send_to(alice.id, "two").await;
    alice.send_to(carol.id, "hey carol").await;

    let client = signed_in_client(&store, "alice").await;
    let summaries = crate::assert_ok!(client.conversation_summaries().await);

    let rows: Vec<(&str, usize, String)> = summaries
        .iter()
        .map(|s| (s.profile.username.as_str(), s.unread_count, s.last_message_preview(20)))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("carol", 0, "hey carol".to_string()),
            ("bob", 2, "two".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_update_username() {
    let (store, alice, _bob) = alice_and_bob().await;
    let client = signed_in_client(&store, "alice").await;

    crate::assert_err!(client.update_username("x").await, ClientError::Validation(_));
    crate::assert_err!(
        client.update_username("bob").await,
        ClientError::Backend(BackendError::Conflict { .. })
    );

    let renamed = crate::assert_ok!(client.update_username("alicia").await);
    assert_eq!(renamed.username, "alicia");
    assert_eq!(store.profile(alice.id).expect("profile").username, "alicia");
    assert_eq!(client.profile().await.map(|p| p.username), Some("alicia".to_string()));
}

#[tokio::test]
async fn test_sign_in_survives_failed_presence_write() {
    let (store, alice, _bob) = alice_and_bob().await;
    let client = client_for(&store);

    store.fail_next_side_writes(1);
    let profile = crate::assert_ok!(client.sign_in(&email_for("alice"), TEST_PASSWORD).await);
    assert_eq!(profile.id, alice.id);
    assert_eq!(profile.status, PresenceStatus::Offline);
    assert!(client.auth_state().await.is_signed_in());
    assert!(client.backend().session().is_some());
}

#[tokio::test]
async fn test_sign_in_without_profile_ends_backend_session() {
    let (store, _alice, _bob) = alice_and_bob().await;
    let client = client_for(&store);

    store.fail_next_side_writes(1);
    store.fail_next_fetches(1);
    crate::assert_err!(
        client.sign_in(&email_for("alice"), TEST_PASSWORD).await,
        ClientError::Backend(BackendError::Network { .. })
    );
    assert!(!client.auth_state().await.is_signed_in());
    assert!(client.backend().session().is_none());
}
