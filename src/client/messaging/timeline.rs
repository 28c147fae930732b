//! Message Timeline
//!
//! The ordered message list of one conversation and the merge rules that
//! keep it consistent no matter in which order notifications arrive:
//!
//! - one entry per id, positioned by `(created_at, id)`
//! - a newer `updated_at` wins; an older one is ignored
//! - `is_read` only ever goes from false to true
//! - a deleted id stays deleted; late inserts and updates for it are dropped

use std::collections::HashSet;
use uuid::Uuid;

use crate::shared::event::ChangeEvent;
use crate::shared::messaging::{ConversationKey, Message};

/// Why a notification left the timeline unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The row belongs to another conversation
    OutsideConversation,
    /// Same id and nothing newer
    Duplicate,
    /// The id was deleted earlier
    Tombstoned,
    /// Update or delete for an id not held locally
    UnknownId,
    /// Older `updated_at` than the held row
    Stale,
}

/// Effect of merging one change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted(usize),
    Replaced(usize),
    Removed(usize),
    Ignored(IgnoreReason),
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, MergeOutcome::Ignored(_))
    }
}

#[derive(Debug, Clone)]
pub struct MessageTimeline {
    key: ConversationKey,
    messages: Vec<Message>,
    tombstones: HashSet<Uuid>,
}

impl MessageTimeline {
    pub fn new(key: ConversationKey) -> Self {
        Self {
            key,
            messages: Vec::new(),
            tombstones: HashSet::new(),
        }
    }

    pub fn key(&self) -> ConversationKey {
        self.key
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.position(id).map(|idx| &self.messages[idx])
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.position(id).is_some()
    }

    pub fn is_tombstoned(&self, id: Uuid) -> bool {
        self.tombstones.contains(&id)
    }

    /// Ids of messages addressed to `user_id` that are still unread
    pub fn unread_for(&self, user_id: Uuid) -> Vec<Uuid> {
        self.messages
            .iter()
            .filter(|m| m.is_unread_for(user_id))
            .map(|m| m.id)
            .collect()
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn insert_position(&self, message: &Message) -> usize {
        let key = message.sort_key();
        self.messages.partition_point(|m| m.sort_key() < key)
    }

    /// Replace the contents with a freshly fetched snapshot.
    ///
    /// Rows outside the conversation or already deleted are dropped; if the
    /// snapshot repeats an id, the merge rules pick the surviving row.
    pub fn replace_all(&mut self, snapshot: Vec<Message>) {
        self.messages.clear();
        for message in snapshot {
            self.insert(message);
        }
    }

    /// Merge a change notification
    pub fn apply(&mut self, event: ChangeEvent<Message>) -> MergeOutcome {
        match event {
            ChangeEvent::Insert(message) => self.insert(message),
            ChangeEvent::Update(message) => self.update(message),
            ChangeEvent::Delete { id, old } => {
                if let Some(old) = &old {
                    if !old.belongs_to(&self.key) {
                        return MergeOutcome::Ignored(IgnoreReason::OutsideConversation);
                    }
                }
                self.remove(id)
            }
        }
    }

    pub fn insert(&mut self, message: Message) -> MergeOutcome {
        if !message.belongs_to(&self.key) {
            return MergeOutcome::Ignored(IgnoreReason::OutsideConversation);
        }
        if self.tombstones.contains(&message.id) {
            return MergeOutcome::Ignored(IgnoreReason::Tombstoned);
        }
        if let Some(idx) = self.position(message.id) {
            return match self.merge_at(idx, message) {
                MergeOutcome::Ignored(IgnoreReason::Stale) => {
                    MergeOutcome::Ignored(IgnoreReason::Duplicate)
                }
                outcome => outcome,
            };
        }
        let idx = self.insert_position(&message);
        self.messages.insert(idx, message);
        MergeOutcome::Inserted(idx)
    }

    pub fn update(&mut self, message: Message) -> MergeOutcome {
        if !message.belongs_to(&self.key) {
            return MergeOutcome::Ignored(IgnoreReason::OutsideConversation);
        }
        if self.tombstones.contains(&message.id) {
            return MergeOutcome::Ignored(IgnoreReason::Tombstoned);
        }
        match self.position(message.id) {
            Some(idx) => self.merge_at(idx, message),
            None => MergeOutcome::Ignored(IgnoreReason::UnknownId),
        }
    }

    /// Remove an id and remember it as deleted
    pub fn remove(&mut self, id: Uuid) -> MergeOutcome {
        self.tombstones.insert(id);
        match self.position(id) {
            Some(idx) => {
                self.messages.remove(idx);
                MergeOutcome::Removed(idx)
            }
            None => MergeOutcome::Ignored(IgnoreReason::UnknownId),
        }
    }

    /// Flip `is_read` locally after a successful write, keeping `updated_at`
    /// so the backend's own update still merges over it
    pub fn mark_read_local(&mut self, id: Uuid) -> MergeOutcome {
        match self.position(id) {
            Some(idx) if !self.messages[idx].is_read => {
                self.messages[idx].is_read = true;
                MergeOutcome::Replaced(idx)
            }
            Some(_) => MergeOutcome::Ignored(IgnoreReason::Duplicate),
            None => MergeOutcome::Ignored(IgnoreReason::UnknownId),
        }
    }

    fn merge_at(&mut self, idx: usize, incoming: Message) -> MergeOutcome {
        let held = &self.messages[idx];
        let incoming_newer = incoming.updated_at >= held.updated_at;
        let is_read = held.is_read || incoming.is_read;

        let mut merged = if incoming_newer { incoming } else { held.clone() };
        merged.is_read = is_read;
        // Position is fixed by the row as first seen.
        merged.created_at = held.created_at;

        if merged == *held {
            let reason = if incoming_newer {
                IgnoreReason::Duplicate
            } else {
                IgnoreReason::Stale
            };
            return MergeOutcome::Ignored(reason);
        }
        self.messages[idx] = merged;
        MergeOutcome::Replaced(idx)
    }
}
