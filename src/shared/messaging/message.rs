//! Chat Message Data Structure
//!
//! Represents a row of the `messages` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conversation::ConversationKey;
use crate::shared::error::SharedError;

/// A direct message between two users
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message ID
    pub id: Uuid,
    /// User who sent the message
    pub sender_id: Uuid,
    /// User the message is addressed to
    pub receiver_id: Uuid,
    /// Text content
    pub content: String,
    /// Whether the receiver has displayed the message; only ever goes false -> true
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Build a message as the backend would store it
    pub fn new(sender_id: Uuid, receiver_id: Uuid, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            content: content.into(),
            is_read: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Conversation this message belongs to
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id, self.receiver_id)
    }

    /// Whether the message was exchanged inside `key`
    pub fn belongs_to(&self, key: &ConversationKey) -> bool {
        key.matches(self.sender_id, self.receiver_id)
    }

    /// Whether `user_id` is the receiver and has not read it yet
    pub fn is_unread_for(&self, user_id: Uuid) -> bool {
        self.receiver_id == user_id && !self.is_read
    }

    /// Sort key: creation time, then id so equal timestamps stay deterministic
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }

    /// Get a preview of the message (first N characters)
    pub fn preview(&self, max_len: usize) -> String {
        if self.content.chars().count() <= max_len {
            self.content.clone()
        } else {
            let mut preview: String = self
                .content
                .chars()
                .take(max_len.saturating_sub(3))
                .collect();
            preview.push_str("...");
            preview
        }
    }
}

/// Insert payload for a new message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
}

impl NewMessage {
    /// Validate compose-field input and build the insert payload.
    ///
    /// Content is trimmed; an empty result is rejected.
    pub fn new(sender_id: Uuid, receiver_id: Uuid, raw: &str) -> Result<Self, SharedError> {
        let content = normalize_content(raw)
            .ok_or_else(|| SharedError::validation("content", "Message cannot be empty"))?;
        Ok(Self {
            sender_id,
            receiver_id,
            content,
        })
    }
}

/// Trim compose-field input, returning `None` when nothing is left to send
pub fn normalize_content(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Partial update for a message row; only `is_read` is ever written by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkRead {
    pub is_read: bool,
}

impl Default for MarkRead {
    fn default() -> Self {
        Self { is_read: true }
    }
}
