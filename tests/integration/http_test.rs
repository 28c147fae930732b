//! HTTP transport tests
//!
//! `HttpBackend` against a wiremock server: request shapes, status mapping
//! and the server-sent event subscription lifecycle.

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::*;
use shadowchat::backend::{Backend, BackendError, HttpBackend};
use shadowchat::shared::{
    ChangeEvent, ChangeFilter, ConversationKey, Message, NewMessage, SubscriptionEvent,
    SubscriptionStatus, TypingUpdate,
};

#[tokio::test]
async fn test_sign_in_stores_session() {
    let server = MockServer::start().await;
    let user_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", ANON_KEY))
        .and(body_json(json!({ "email": "neo@example.com", "password": "secret" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(session_json(user_id, "neo@example.com")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = crate::assert_ok!(HttpBackend::new(config_for(&server)));
    let session = crate::assert_ok!(backend.sign_in("neo@example.com", "secret").await);
    assert_eq!(session.user_id(), user_id);
    assert_eq!(backend.session().map(|s| s.access_token), Some(ACCESS_TOKEN.to_string()));
}

#[tokio::test]
async fn test_rejected_credentials_are_unauthenticated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let backend = crate::assert_ok!(HttpBackend::new(config_for(&server)));
    crate::assert_err!(
        backend.sign_in("neo@example.com", "wrong").await,
        BackendError::Unauthenticated
    );
    assert!(backend.session().is_none());
}

#[tokio::test]
async fn test_calls_without_session_never_reach_the_server() {
    let server = MockServer::start().await;
    let backend = crate::assert_ok!(HttpBackend::new(config_for(&server)));

    crate::assert_err!(
        backend.fetch_profiles(Uuid::new_v4()).await,
        BackendError::Unauthenticated
    );
    crate::assert_err!(
        backend.subscribe_messages(ChangeFilter::All).await,
        BackendError::Unauthenticated
    );
    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_fetch_conversation_query() {
    let server = MockServer::start().await;
    let me = Uuid::new_v4();
    let peer = Uuid::new_v4();
    let backend = signed_in_backend(&server, me).await;

    let rows = vec![Message::new(peer, me, "one"), Message::new(me, peer, "two")];
    let key = ConversationKey::new(me, peer);
    let (a, b) = key.participants();
    Mock::given(method("GET"))
        .and(path("/rest/v1/messages"))
        .and(header("authorization", format!("Bearer {}", ACCESS_TOKEN).as_str()))
        .and(query_param("order", "created_at.asc,id.asc"))
        .and(query_param(
            "or",
            format!(
                "(and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a}))"
            )
            .as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(&rows))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = crate::assert_ok!(backend.fetch_conversation(key).await);
    assert_eq!(fetched, rows);
}

#[tokio::test]
async fn test_insert_message_returns_stored_row() {
    let server = MockServer::start().await;
    let me = Uuid::new_v4();
    let peer = Uuid::new_v4();
    let backend = signed_in_backend(&server, me).await;

    let stored = Message::new(me, peer, "hello");
    Mock::given(method("POST"))
        .and(path("/rest/v1/messages"))
        .and(header("prefer", "return=representation"))
        .and(body_json(json!({ "sender_id": me, "receiver_id": peer, "content": "hello" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(&stored))
        .mount(&server)
        .await;

    let new_message = crate::assert_ok!(NewMessage::new(me, peer, " hello "));
    let row = crate::assert_ok!(backend.insert_message(&new_message).await);
    assert_eq!(row, stored);
}

#[tokio::test]
async fn test_row_level_refusal_maps_to_forbidden() {
    let server = MockServer::start().await;
    let me = Uuid::new_v4();
    let backend = signed_in_backend(&server, me).await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/messages"))
        .respond_with(
            ResponseTemplate::new(403).set_body_string("violates row-level security policy"),
        )
        .mount(&server)
        .await;

    let err = backend.delete_message(Uuid::new_v4()).await.unwrap_err();
    assert_matches!(&err, BackendError::Forbidden { .. });
    crate::assert_contains!(err.to_string(), "row-level security");
}

#[tokio::test]
async fn test_typing_upsert_is_keyed_by_pair() {
    let server = MockServer::start().await;
    let me = Uuid::new_v4();
    let peer = Uuid::new_v4();
    let backend = signed_in_backend(&server, me).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/typing_indicators"))
        .and(query_param("on_conflict", "user_id,chat_with_id"))
        .and(header("prefer", "resolution=merge-duplicates,return=minimal"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    crate::assert_ok!(backend.upsert_typing(&TypingUpdate::new(me, peer, true)).await);
}

#[tokio::test]
async fn test_sse_subscription_reconnects_and_resubscribes() {
    let server = MockServer::start().await;
    let me = Uuid::new_v4();
    let peer = Uuid::new_v4();
    let backend = signed_in_backend(&server, me).await;

    let incoming = Message::new(peer, me, "over the wire");
    Mock::given(method("GET"))
        .and(path("/realtime/v1/messages"))
        .and(header("accept", "text/event-stream"))
        .and(header("apikey", ANON_KEY))
        .respond_with(sse_response(sse_body(&[ChangeEvent::Insert(incoming.clone())])))
        .mount(&server)
        .await;

    let key = ConversationKey::new(me, peer);
    let mut sub = crate::assert_ok!(
        backend
            .subscribe_messages(ChangeFilter::Conversation(key))
            .await
    );

    let mut seen = Vec::new();
    while seen.len() < 7 {
        let event = within("sse event", sub.next()).await.expect("stream open");
        seen.push(event);
    }
    sub.unsubscribe();

    let status = |s| SubscriptionEvent::<Message>::Status(s);
    let change = SubscriptionEvent::Change(ChangeEvent::Insert(incoming));
    assert_eq!(
        seen,
        vec![
            status(SubscriptionStatus::Connecting),
            status(SubscriptionStatus::Connected),
            change.clone(),
            status(SubscriptionStatus::Retrying),
            status(SubscriptionStatus::Connecting),
            status(SubscriptionStatus::Resubscribed),
            change,
        ]
    );
}

#[tokio::test]
async fn test_sse_refused_subscription_closes() {
    let server = MockServer::start().await;
    let backend = signed_in_backend(&server, Uuid::new_v4()).await;

    Mock::given(method("GET"))
        .and(path("/realtime/v1/profiles"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut sub = crate::assert_ok!(backend.subscribe_profiles(ChangeFilter::All).await);
    assert_eq!(
        within("connecting", sub.next()).await,
        Some(SubscriptionEvent::Status(SubscriptionStatus::Connecting))
    );
    assert_matches!(
        within("error", sub.next()).await,
        Some(SubscriptionEvent::Status(SubscriptionStatus::Error(_)))
    );
    assert_eq!(
        within("closed", sub.next()).await,
        Some(SubscriptionEvent::Status(SubscriptionStatus::Closed))
    );
    assert_eq!(within("end", sub.next()).await, None);
}
