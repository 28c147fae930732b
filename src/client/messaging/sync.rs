/**
 * Conversation Synchronizer
 *
 * Owns the message list of one (local user, peer) conversation and keeps it
 * consistent with the backend: an initial fetch, then every insert, update
 * and delete notification merged on top.
 *
 * # State Machine
 *
 * ```text
 * Uninitialized -> Loading -> Synced
 *                     |  ^
 *                     v  |  retry()
 *                   Failed
 * ```
 *
 * Notifications that arrive before the first snapshot (or while a reload
 * is running) are buffered and replayed once the snapshot is in place.
 *
 * # Subscriptions
 *
 * Two subscriptions are opened before the first fetch, so nothing written
 * between fetch and subscribe can be missed: messages of this conversation,
 * and typing rows of the peer. A `Resubscribed` status on the message
 * stream means notifications may have been lost, and triggers a full
 * reload.
 *
 * # Writes
 *
 * Sends, deletes and read receipts are written through to the backend.
 * The notification stream reflects the result; a successful write is also
 * applied locally right away and the echo is deduplicated by id.
 */

use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::timeline::{MergeOutcome, MessageTimeline};
use super::typing::{ComposeTracker, PeerTyping};
use crate::backend::{Backend, Subscription};
use crate::client::error::{ClientError, ClientResult};
use crate::client::with_timeout;
use crate::shared::config::AppConfig;
use crate::shared::event::{ChangeEvent, ChangeFilter, SubscriptionEvent, SubscriptionStatus};
use crate::shared::messaging::{
    normalize_content, ConversationKey, Message, NewMessage, Profile, TypingIndicator,
    TypingUpdate,
};

/// Lifecycle of a synchronizer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Uninitialized,
    Loading,
    Synced,
    /// The last load failed; `retry()` runs it again
    Failed(String),
}

impl SyncState {
    /// Whether a load has finished, one way or the other
    pub fn is_settled(&self) -> bool {
        matches!(self, SyncState::Synced | SyncState::Failed(_))
    }
}

/// Immutable snapshot handed to observers
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub key: ConversationKey,
    pub local_id: Uuid,
    pub peer_id: Uuid,
    pub peer: Option<Profile>,
    pub state: SyncState,
    pub messages: Vec<Message>,
    pub peer_typing: bool,
    /// Latest status of the message subscription
    pub connection: Option<SubscriptionStatus>,
}

/// Next item from either subscription
#[derive(Debug)]
pub enum Incoming {
    Message(SubscriptionEvent<Message>),
    Typing(SubscriptionEvent<TypingIndicator>),
}

pub struct ConversationSynchronizer {
    backend: Arc<dyn Backend>,
    config: AppConfig,
    local_id: Uuid,
    peer_id: Uuid,
    peer: Option<Profile>,
    state: SyncState,
    timeline: MessageTimeline,
    pending: Vec<ChangeEvent<Message>>,
    messages_sub: Option<Subscription<Message>>,
    typing_sub: Option<Subscription<TypingIndicator>>,
    connection: Option<SubscriptionStatus>,
    compose: ComposeTracker,
    peer_typing: PeerTyping,
    /// Ids with a read receipt requested and not failed
    read_requested: HashSet<Uuid>,
}

impl std::fmt::Debug for ConversationSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSynchronizer")
            .field("local_id", &self.local_id)
            .field("peer_id", &self.peer_id)
            .field("state", &self.state)
            .field("messages", &self.timeline.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Wait on an optional subscription; a missing one never yields
async fn next_of<T: Send + 'static>(
    subscription: &mut Option<Subscription<T>>,
) -> Option<SubscriptionEvent<T>> {
    match subscription {
        Some(sub) => sub.next().await,
        None => None,
    }
}

impl ConversationSynchronizer {
    pub fn new(backend: Arc<dyn Backend>, config: AppConfig, local_id: Uuid, peer_id: Uuid) -> Self {
        let key = ConversationKey::new(local_id, peer_id);
        let peer_typing = PeerTyping::new(peer_id, local_id, config.typing_timeout);
        Self {
            backend,
            config,
            local_id,
            peer_id,
            peer: None,
            state: SyncState::Uninitialized,
            timeline: MessageTimeline::new(key),
            pending: Vec::new(),
            messages_sub: None,
            typing_sub: None,
            connection: None,
            compose: ComposeTracker::new(),
            peer_typing,
            read_requested: HashSet::new(),
        }
    }

    /// Attach the peer's profile for the view header
    pub fn with_peer(mut self, peer: Profile) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn key(&self) -> ConversationKey {
        self.timeline.key()
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        self.timeline.messages()
    }

    pub fn timeline(&self) -> &MessageTimeline {
        &self.timeline
    }

    /// Subscribe to both streams, then load.
    ///
    /// A failed subscribe leaves the state `Failed`; `retry()` opens the
    /// missing streams again.
    pub async fn open(&mut self) -> ClientResult<()> {
        tracing::info!("[SYNC] Opening conversation {} <-> {}", self.local_id, self.peer_id);
        if let Err(e) = self.subscribe_missing().await {
            tracing::error!("[SYNC] Failed to subscribe to {:?}: {}", self.key(), e);
            self.enter_failed(e.to_string());
            return Err(e);
        }
        self.load().await
    }

    async fn subscribe_missing(&mut self) -> ClientResult<()> {
        if self.messages_sub.is_none() {
            let messages = self
                .backend
                .subscribe_messages(ChangeFilter::Conversation(self.key()))
                .await?;
            self.messages_sub = Some(messages);
        }
        if self.typing_sub.is_none() {
            let typing = self
                .backend
                .subscribe_typing(ChangeFilter::eq("user_id", self.peer_id))
                .await?;
            self.typing_sub = Some(typing);
        }
        Ok(())
    }

    /// The next successful load replaces everything buffered so far
    fn enter_failed(&mut self, reason: String) {
        self.state = SyncState::Failed(reason);
        self.pending.clear();
    }

    /// Fetch the conversation and replace local state with it
    pub async fn load(&mut self) -> ClientResult<()> {
        self.state = SyncState::Loading;
        tracing::debug!("[SYNC] Loading {:?}", self.key());

        let result = with_timeout(
            self.config.request_timeout,
            "fetch conversation",
            self.backend.fetch_conversation(self.key()),
        )
        .await;

        match result {
            Ok(rows) => {
                self.timeline.replace_all(rows);
                self.state = SyncState::Synced;
                let pending = std::mem::take(&mut self.pending);
                let replayed = pending.len();
                for event in pending {
                    self.merge(event);
                }
                tracing::info!(
                    "[SYNC] Synced {} messages ({} buffered notifications replayed)",
                    self.timeline.len(),
                    replayed
                );
                if self.config.auto_mark_read {
                    self.mark_visible_as_read().await;
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!("[SYNC] Failed to load conversation {:?}: {}", self.key(), e);
                self.enter_failed(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Run the load again after a failure, reopening any stream that is
    /// not subscribed
    pub async fn retry(&mut self) -> ClientResult<()> {
        tracing::info!("[SYNC] Retrying {:?}", self.key());
        self.open().await
    }

    /// Merge a change, or buffer it while the first snapshot is loading.
    /// After a failed load changes are dropped; the reload on retry covers
    /// them.
    ///
    /// Returns `None` when the change was not merged.
    pub fn apply(&mut self, event: ChangeEvent<Message>) -> Option<MergeOutcome> {
        match self.state {
            SyncState::Synced => Some(self.merge(event)),
            SyncState::Failed(_) => {
                tracing::debug!("[SYNC] Dropping {:?} {} until retry", event.kind(), event.row_id());
                None
            }
            SyncState::Uninitialized | SyncState::Loading => {
                tracing::debug!("[SYNC] Buffering {:?} {} while {:?}", event.kind(), event.row_id(), self.state);
                self.pending.push(event);
                None
            }
        }
    }

    fn merge(&mut self, event: ChangeEvent<Message>) -> MergeOutcome {
        let kind = event.kind();
        let id = event.row_id();
        let outcome = self.timeline.apply(event);
        tracing::debug!("[SYNC] {:?} {} -> {:?}", kind, id, outcome);
        outcome
    }

    pub fn on_insert(&mut self, message: Message) -> Option<MergeOutcome> {
        self.apply(ChangeEvent::Insert(message))
    }

    pub fn on_update(&mut self, message: Message) -> Option<MergeOutcome> {
        self.apply(ChangeEvent::Update(message))
    }

    pub fn on_delete(&mut self, message: Message) -> Option<MergeOutcome> {
        self.apply(ChangeEvent::deleted(message))
    }

    /// Wait for the next notification or status from either subscription.
    ///
    /// Cancel safe: nothing is consumed unless it is returned. `None` once
    /// both streams have ended.
    pub async fn next_incoming(&mut self) -> Option<Incoming> {
        tokio::select! {
            Some(event) = next_of(&mut self.messages_sub) => Some(Incoming::Message(event)),
            Some(event) = next_of(&mut self.typing_sub) => Some(Incoming::Typing(event)),
            else => None,
        }
    }

    /// Handle one item from `next_incoming`
    pub async fn process(&mut self, incoming: Incoming) {
        match incoming {
            Incoming::Message(SubscriptionEvent::Change(event)) => {
                let outcome = self.apply(event);
                let inserted = matches!(outcome, Some(MergeOutcome::Inserted(_)));
                if inserted && self.config.auto_mark_read {
                    self.mark_visible_as_read().await;
                }
            }
            Incoming::Message(SubscriptionEvent::Status(status)) => {
                self.on_message_status(status).await;
            }
            Incoming::Typing(SubscriptionEvent::Change(event)) => {
                self.peer_typing.observe(&event, Instant::now());
            }
            Incoming::Typing(SubscriptionEvent::Status(status)) => match status {
                SubscriptionStatus::Closed => {
                    tracing::warn!("[SYNC] Typing stream for {} closed", self.peer_id);
                    self.typing_sub = None;
                    self.peer_typing.reset();
                }
                SubscriptionStatus::Resubscribed | SubscriptionStatus::Retrying => {
                    self.peer_typing.reset();
                }
                _ => {}
            },
        }
    }

    async fn on_message_status(&mut self, status: SubscriptionStatus) {
        match &status {
            SubscriptionStatus::Resubscribed => {
                tracing::info!("[SYNC] Message stream reconnected, reloading {:?}", self.key());
                // Failure is recorded in the state and logged by load().
                let _ = self.load().await;
            }
            SubscriptionStatus::Closed => {
                tracing::warn!("[SYNC] Message stream for {:?} closed", self.key());
                self.messages_sub = None;
            }
            SubscriptionStatus::Error(reason) => {
                tracing::warn!("[SYNC] Message stream error: {}", reason);
            }
            _ => {}
        }
        self.connection = Some(status);
    }

    /// Send compose text to the peer.
    ///
    /// Whitespace-only input writes nothing and returns `Ok(None)`.
    pub async fn send(&mut self, raw: &str) -> ClientResult<Option<Message>> {
        let Some(content) = normalize_content(raw) else {
            return Ok(None);
        };
        let new_message = NewMessage {
            sender_id: self.local_id,
            receiver_id: self.peer_id,
            content,
        };

        let result = with_timeout(
            self.config.request_timeout,
            "insert message",
            self.backend.insert_message(&new_message),
        )
        .await;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                tracing::error!("[SYNC] Message not delivered to {}: {}", self.peer_id, e);
                return Err(e.into());
            }
        };
        tracing::debug!("[SYNC] Sent {}", row.id);

        if self.config.optimistic_send {
            self.apply(ChangeEvent::Insert(row.clone()));
        }
        // The message is stored; a failed typing clear must not fail the send.
        if self.compose.clear() {
            let _ = self.write_typing(false).await;
        }
        Ok(Some(row))
    }

    /// Write a read receipt. Idempotent: already-read and already-requested
    /// ids issue no write.
    pub async fn mark_as_read(&mut self, id: Uuid) -> ClientResult<()> {
        if self.read_requested.contains(&id) {
            return Ok(());
        }
        if self.timeline.get(id).map(|m| m.is_read).unwrap_or(false) {
            return Ok(());
        }
        self.read_requested.insert(id);
        let result = with_timeout(
            self.config.request_timeout,
            "mark read",
            self.backend.mark_message_read(id),
        )
        .await;
        match result {
            Ok(()) => {
                self.timeline.mark_read_local(id);
                Ok(())
            }
            Err(e) => {
                self.read_requested.remove(&id);
                tracing::warn!("[SYNC] Failed to mark {} read: {}", id, e);
                Err(e.into())
            }
        }
    }

    /// Mark every unread message addressed to the local user; returns how
    /// many receipts were written. Failures are logged and retried on the
    /// next pass.
    pub async fn mark_visible_as_read(&mut self) -> usize {
        let ids: Vec<Uuid> = self
            .timeline
            .unread_for(self.local_id)
            .into_iter()
            .filter(|id| !self.read_requested.contains(id))
            .collect();
        if ids.is_empty() {
            return 0;
        }
        self.read_requested.extend(ids.iter().copied());

        let backend = &self.backend;
        let timeout = self.config.request_timeout;
        let results = join_all(
            ids.iter()
                .map(|id| with_timeout(timeout, "mark read", backend.mark_message_read(*id))),
        )
        .await;

        let mut written = 0;
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    self.timeline.mark_read_local(id);
                    written += 1;
                }
                Err(e) => {
                    self.read_requested.remove(&id);
                    tracing::warn!("[SYNC] Failed to mark {} read: {}", id, e);
                }
            }
        }
        written
    }

    /// Delete a message; only the sender's deletes are accepted by the backend
    pub async fn delete_message(&mut self, id: Uuid) -> ClientResult<()> {
        let result = with_timeout(
            self.config.request_timeout,
            "delete message",
            self.backend.delete_message(id),
        )
        .await;
        match result {
            Ok(()) => {
                // The tombstone also filters the next snapshot.
                self.timeline.remove(id);
                Ok(())
            }
            Err(e) => {
                tracing::error!("[SYNC] Failed to delete {}: {}", id, e);
                Err(e.into())
            }
        }
    }

    /// Compose field changed; writes the typing row on transitions only
    pub async fn compose_changed(&mut self, text: &str) -> ClientResult<()> {
        match self.compose.on_input(text) {
            Some(typing) => self.write_typing(typing).await,
            None => Ok(()),
        }
    }

    /// Compose field lost focus
    pub async fn compose_blurred(&mut self) -> ClientResult<()> {
        if self.compose.clear() {
            self.write_typing(false).await?;
        }
        Ok(())
    }

    async fn write_typing(&self, is_typing: bool) -> ClientResult<()> {
        let update = TypingUpdate::new(self.local_id, self.peer_id, is_typing);
        with_timeout(
            self.config.request_timeout,
            "upsert typing",
            self.backend.upsert_typing(&update),
        )
        .await
        .map_err(|e| {
            tracing::warn!("[SYNC] Failed to update typing indicator: {}", e);
            ClientError::from(e)
        })
    }

    pub fn peer_is_typing(&self) -> bool {
        self.peer_typing.is_typing(Instant::now())
    }

    pub fn snapshot(&self) -> ConversationView {
        ConversationView {
            key: self.key(),
            local_id: self.local_id,
            peer_id: self.peer_id,
            peer: self.peer.clone(),
            state: self.state.clone(),
            messages: self.timeline.messages().to_vec(),
            peer_typing: self.peer_is_typing(),
            connection: self.connection.clone(),
        }
    }

    /// Tear down: unsubscribe, then clear the local typing row for this pair
    pub async fn close(mut self) -> ClientResult<()> {
        if let Some(sub) = self.messages_sub.take() {
            sub.unsubscribe();
        }
        if let Some(sub) = self.typing_sub.take() {
            sub.unsubscribe();
        }
        self.compose.clear();
        tracing::info!("[SYNC] Closed conversation {} <-> {}", self.local_id, self.peer_id);
        self.write_typing(false).await
    }
}
