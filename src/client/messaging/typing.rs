//! Typing indicators, both directions.
//!
//! `ComposeTracker` decides when the local user's typing row must be
//! written: only on empty/non-empty transitions of the compose field, plus
//! an explicit clear on send and blur. `PeerTyping` follows the peer's row
//! and expires it when it has not been refreshed within the timeout.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::shared::event::ChangeEvent;
use crate::shared::messaging::TypingIndicator;

/// Local compose-field state
#[derive(Debug, Clone, Default)]
pub struct ComposeTracker {
    typing: bool,
}

impl ComposeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Feed the current compose text; `Some(flag)` when a write is due
    pub fn on_input(&mut self, text: &str) -> Option<bool> {
        let typing = !text.is_empty();
        if typing == self.typing {
            return None;
        }
        self.typing = typing;
        Some(typing)
    }

    /// Send or blur; `true` if a "not typing" write is due
    pub fn clear(&mut self) -> bool {
        std::mem::replace(&mut self.typing, false)
    }
}

#[derive(Debug, Clone, Copy)]
struct Observed {
    is_typing: bool,
    updated_at: DateTime<Utc>,
    received_at: Instant,
}

/// The peer's typing row as seen by the local user
#[derive(Debug, Clone)]
pub struct PeerTyping {
    peer_id: Uuid,
    local_id: Uuid,
    timeout: Duration,
    observed: Option<Observed>,
}

impl PeerTyping {
    pub fn new(peer_id: Uuid, local_id: Uuid, timeout: Duration) -> Self {
        Self {
            peer_id,
            local_id,
            timeout,
            observed: None,
        }
    }

    /// Take a typing notification received at `now`; returns whether it was kept.
    ///
    /// Only rows of the peer typing to the local user count. `updated_at`
    /// orders rows; staleness is measured from local receipt so clock skew
    /// between the two clients cannot expire a fresh row.
    pub fn observe(&mut self, event: &ChangeEvent<TypingIndicator>, now: Instant) -> bool {
        let row = match event {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) => row,
            ChangeEvent::Delete { old, .. } => {
                let ours = old
                    .as_ref()
                    .map(|row| row.is_from_peer(self.peer_id, self.local_id))
                    .unwrap_or(false);
                if ours {
                    self.observed = None;
                }
                return ours;
            }
        };
        if !row.is_from_peer(self.peer_id, self.local_id) {
            return false;
        }
        if let Some(held) = &self.observed {
            if row.updated_at < held.updated_at {
                return false;
            }
        }
        self.observed = Some(Observed {
            is_typing: row.is_typing,
            updated_at: row.updated_at,
            received_at: now,
        });
        true
    }

    /// Whether to show "typing" at `now`
    pub fn is_typing(&self, now: Instant) -> bool {
        match &self.observed {
            Some(observed) => {
                observed.is_typing && now.saturating_duration_since(observed.received_at) < self.timeout
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.observed = None;
    }
}
