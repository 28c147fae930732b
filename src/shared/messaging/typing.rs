//! Typing Indicator Data Structure
//!
//! One row per (user, chat partner) pair in `typing_indicators`; upserted on
//! every compose transition, last write wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingIndicator {
    pub id: Uuid,
    /// User who is (or stopped) typing
    pub user_id: Uuid,
    /// User they are typing to
    pub chat_with_id: Uuid,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

impl TypingIndicator {
    /// Whether this row is `peer` typing to `local`
    pub fn is_from_peer(&self, peer: Uuid, local: Uuid) -> bool {
        self.user_id == peer && self.chat_with_id == local
    }
}

/// Upsert payload keyed by `(user_id, chat_with_id)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingUpdate {
    pub user_id: Uuid,
    pub chat_with_id: Uuid,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

impl TypingUpdate {
    pub fn new(user_id: Uuid, chat_with_id: Uuid, is_typing: bool) -> Self {
        Self {
            user_id,
            chat_with_id,
            is_typing,
            updated_at: Utc::now(),
        }
    }
}
