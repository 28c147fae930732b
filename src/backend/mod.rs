//! Backend Module
//!
//! Everything the client needs from the hosted backend: authentication, the
//! `profiles`, `messages` and `typing_indicators` tables, and change
//! notifications on those tables.
//!
//! # Architecture
//!
//! - **`Backend`** - the trait every transport implements; the client only
//!   ever holds an `Arc<dyn Backend>`
//! - **`http`** - `HttpBackend`, REST + server-sent events against the hosted service
//! - **`memory`** - `MemoryBackend`, an in-process store with the same
//!   authorization rules, for tests and offline development
//! - **`realtime`** - subscription handles and the two change-stream transports
//! - **`error`** - `BackendError`
//!
//! # Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs      - Backend trait, session types
//! ├── http.rs     - HTTP transport
//! ├── memory.rs   - In-process transport
//! ├── realtime/   - Subscriptions (SSE reader, broadcast bus)
//! └── error/      - Error types
//! ```
//!
//! # Authorization
//!
//! Row-level rules are enforced by the backend, never by the client:
//!
//! - messages are written only with `sender_id` = caller
//! - only the sender may delete a message
//! - only the receiver may mark a message read
//! - typing rows and profiles are written only by their owner

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::event::ChangeFilter;
use crate::shared::messaging::{
    ConversationKey, Message, NewMessage, Profile, ProfileUpdate, TypingIndicator, TypingUpdate,
};

/// Backend error types
pub mod error;

/// Realtime subscriptions
pub mod realtime;

/// REST + SSE transport
pub mod http;

/// In-process transport
pub mod memory;

pub use error::{BackendError, BackendResult};
pub use http::HttpBackend;
pub use memory::{MemoryBackend, MemoryStore, WriteOp};
pub use realtime::Subscription;

/// Authenticated identity as reported by the auth service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// An active sign-in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

impl Session {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }
}

/// The hosted backend as seen by one signed-in client
///
/// Every call is scoped to the connection's session; calls that need one
/// fail with [`BackendError::Unauthenticated`] when signed out.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Register an account and create its profile
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> BackendResult<AuthUser>;

    /// Authenticate and store the session on this connection
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session>;

    /// End the session; subsequent calls are unauthenticated
    async fn sign_out(&self) -> BackendResult<()>;

    /// User behind the current session, if any
    async fn current_user(&self) -> BackendResult<Option<AuthUser>>;

    /// Current session without a round trip
    fn session(&self) -> Option<Session>;

    /// All profiles except `exclude`
    async fn fetch_profiles(&self, exclude: Uuid) -> BackendResult<Vec<Profile>>;

    async fn fetch_profile(&self, id: Uuid) -> BackendResult<Profile>;

    /// Partially update a profile, returning the stored row
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> BackendResult<Profile>;

    /// Messages between the two participants, oldest first
    async fn fetch_conversation(&self, key: ConversationKey) -> BackendResult<Vec<Message>>;

    /// Every message sent or received by `user_id`, oldest first
    async fn fetch_messages_involving(&self, user_id: Uuid) -> BackendResult<Vec<Message>>;

    /// Insert a message, returning the stored row
    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message>;

    /// Set `is_read = true` on a message addressed to the caller
    async fn mark_message_read(&self, id: Uuid) -> BackendResult<()>;

    async fn delete_message(&self, id: Uuid) -> BackendResult<()>;

    /// Upsert the caller's typing row keyed by `(user_id, chat_with_id)`
    async fn upsert_typing(&self, update: &TypingUpdate) -> BackendResult<()>;

    async fn subscribe_messages(&self, filter: ChangeFilter) -> BackendResult<Subscription<Message>>;

    async fn subscribe_profiles(&self, filter: ChangeFilter) -> BackendResult<Subscription<Profile>>;

    async fn subscribe_typing(&self, filter: ChangeFilter) -> BackendResult<Subscription<TypingIndicator>>;
}
