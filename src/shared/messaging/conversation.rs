//! Conversation Data Structure
//!
//! A direct conversation is identified by the unordered pair of its two
//! participants; there is no conversation row in the backend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::message::Message;
use super::profile::Profile;

/// Unordered participant pair; `ConversationKey::new(a, b) == ConversationKey::new(b, a)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    low: Uuid,
    high: Uuid,
}

impl ConversationKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Both participants, in canonical order
    pub fn participants(&self) -> (Uuid, Uuid) {
        (self.low, self.high)
    }

    /// Check if user is a participant
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// Get the other participant
    pub fn other_participant(&self, current_user_id: Uuid) -> Option<Uuid> {
        if current_user_id == self.low {
            Some(self.high)
        } else if current_user_id == self.high {
            Some(self.low)
        } else {
            None
        }
    }

    /// Whether a (sender, receiver) pair lies in this conversation
    pub fn matches(&self, sender_id: Uuid, receiver_id: Uuid) -> bool {
        ConversationKey::new(sender_id, receiver_id) == *self
    }
}

/// Roster row with conversation context: the peer, the latest message and
/// how many messages from the peer are still unread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub profile: Profile,
    pub last_message: Option<Message>,
    pub unread_count: usize,
}

impl ConversationSummary {
    /// Preview text of the last message
    pub fn last_message_preview(&self, max_len: usize) -> String {
        self.last_message
            .as_ref()
            .map(|m| m.preview(max_len))
            .unwrap_or_default()
    }
}

/// Build one summary per peer profile from every message involving `local_id`.
///
/// Peers with recent activity come first; peers without messages follow in
/// the order the profiles were given.
pub fn summarize(
    local_id: Uuid,
    peers: &[Profile],
    messages: &[Message],
) -> Vec<ConversationSummary> {
    let mut latest: HashMap<Uuid, &Message> = HashMap::new();
    let mut unread: HashMap<Uuid, usize> = HashMap::new();

    for message in messages {
        let key = message.conversation();
        let Some(peer) = key.other_participant(local_id) else {
            continue;
        };
        if message.is_unread_for(local_id) {
            *unread.entry(peer).or_default() += 1;
        }
        let newer = latest
            .get(&peer)
            .map(|current| message.sort_key() > current.sort_key())
            .unwrap_or(true);
        if newer {
            latest.insert(peer, message);
        }
    }

    let mut summaries: Vec<ConversationSummary> = peers
        .iter()
        .filter(|p| p.id != local_id)
        .map(|profile| ConversationSummary {
            profile: profile.clone(),
            last_message: latest.get(&profile.id).map(|m| (*m).clone()),
            unread_count: unread.get(&profile.id).copied().unwrap_or(0),
        })
        .collect();

    // Stable sort keeps the roster order among peers without history.
    summaries.sort_by(|a, b| {
        let a_key = a.last_message.as_ref().map(Message::sort_key);
        let b_key = b.last_message.as_ref().map(Message::sort_key);
        b_key.cmp(&a_key)
    });
    summaries
}
