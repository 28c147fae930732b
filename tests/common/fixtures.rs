//! Signed-in users on a shared in-memory store
//!
//! Every fixture user gets their own `MemoryBackend` (their own session) on
//! a common `MemoryStore`, so a test can play both sides of a conversation.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use shadowchat::backend::{Backend, MemoryBackend, MemoryStore, WriteOp};
use shadowchat::client::ChatClient;
use shadowchat::shared::{AppConfig, NewMessage, Message, TypingUpdate};

pub const TEST_PASSWORD: &str = "secret-password";

/// Config for in-memory tests; the URL is never contacted
pub fn test_config() -> AppConfig {
    AppConfig::builder()
        .anon_key("test-anon-key")
        .request_timeout(Duration::from_secs(2))
        .typing_timeout(Duration::from_secs(5))
        .build()
        .expect("valid test config")
}

/// Same as [`test_config`] with automatic read receipts off
pub fn manual_read_config() -> AppConfig {
    AppConfig::builder()
        .anon_key("test-anon-key")
        .request_timeout(Duration::from_secs(2))
        .auto_mark_read(false)
        .build()
        .expect("valid test config")
}

pub fn email_for(username: &str) -> String {
    format!("{}@example.com", username)
}

/// A registered, signed-in user
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub username: String,
    pub backend: Arc<MemoryBackend>,
}

impl TestUser {
    /// Register `username` on `store` and sign in
    pub async fn register(store: &Arc<MemoryStore>, username: &str) -> Self {
        let backend = MemoryBackend::connect(store.clone());
        let email = email_for(username);
        let user = backend
            .sign_up(&email, TEST_PASSWORD, username)
            .await
            .expect("sign up");
        backend
            .sign_in(&email, TEST_PASSWORD)
            .await
            .expect("sign in");
        Self {
            id: user.id,
            username: username.to_string(),
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Write a message to `to` directly through the backend
    pub async fn send_to(&self, to: Uuid, content: &str) -> Message {
        let message = NewMessage::new(self.id, to, content).expect("valid content");
        self.backend
            .insert_message(&message)
            .await
            .expect("insert message")
    }

    pub async fn set_typing(&self, to: Uuid, is_typing: bool) {
        self.backend
            .upsert_typing(&TypingUpdate::new(self.id, to, is_typing))
            .await
            .expect("upsert typing");
    }
}

/// Two users on one store
pub async fn alice_and_bob() -> (Arc<MemoryStore>, TestUser, TestUser) {
    let store = MemoryStore::new();
    let alice = TestUser::register(&store, "alice").await;
    let bob = TestUser::register(&store, "bob").await;
    store.clear_writes();
    (store, alice, bob)
}

/// A `ChatClient` for an already-registered user, not yet signed in
pub fn client_for(store: &Arc<MemoryStore>) -> ChatClient {
    ChatClient::new(
        Arc::new(MemoryBackend::connect(store.clone())),
        test_config(),
    )
}

/// Typing values written to the store, in order
pub fn typing_writes(store: &MemoryStore) -> Vec<(Uuid, Uuid, bool)> {
    store
        .writes()
        .into_iter()
        .filter_map(|op| match op {
            WriteOp::UpsertTyping(update) => {
                Some((update.user_id, update.chat_with_id, update.is_typing))
            }
            _ => None,
        })
        .collect()
}

/// Message contents of a list, in order
pub fn contents(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}
