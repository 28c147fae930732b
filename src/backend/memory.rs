//! In-Memory Backend
//!
//! A complete in-process stand-in for the hosted service. A `MemoryStore`
//! holds the tables and the change bus; each `MemoryBackend` is one
//! client's connection to it with its own session, so two users can
//! converse through a single store.
//!
//! The same row-level rules as the hosted service are enforced here, and
//! every accepted write is recorded as a [`WriteOp`] so callers can assert
//! exactly which writes were issued.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use super::realtime::{BusRecord, ChangeBus, Subscription};
use super::{AuthUser, Backend, BackendError, BackendResult, Session};
use crate::shared::event::{ChangeEvent, ChangeFilter};
use crate::shared::messaging::{
    ConversationKey, Message, NewMessage, Profile, ProfileUpdate, TypingIndicator, TypingUpdate,
};

/// A write accepted by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    SignUp { user_id: Uuid, username: String },
    UpdateProfile { id: Uuid, update: ProfileUpdate },
    InsertMessage(Message),
    MarkRead(Uuid),
    DeleteMessage(Uuid),
    UpsertTyping(TypingUpdate),
}

#[derive(Debug, Clone)]
struct Account {
    id: Uuid,
    email: String,
    password: String,
}

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    profiles: HashMap<Uuid, Profile>,
    messages: HashMap<Uuid, Message>,
    typing: HashMap<(Uuid, Uuid), TypingIndicator>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Tables {
    /// Strictly increasing server clock so creation order is never ambiguous
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

/// Shared tables, change bus and write log
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    bus: ChangeBus,
    writes: Mutex<Vec<WriteOp>>,
    failing_fetches: AtomicUsize,
    failing_writes: AtomicUsize,
    failing_side_writes: AtomicUsize,
    failing_subscribes: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Consume one pending injected failure, if any
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The change bus, e.g. to inject raw notifications
    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Publish a notification without touching the tables
    pub fn publish<T: BusRecord>(&self, event: ChangeEvent<T>) -> usize {
        self.bus.publish(event)
    }

    /// Simulate the realtime connection dropping or coming back
    pub fn set_realtime_online(&self, online: bool) {
        self.bus.set_online(online);
    }

    /// Make the next `count` reads fail with a network error
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` message writes fail with a network error
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` typing or profile writes fail with a network error
    pub fn fail_next_side_writes(&self, count: usize) {
        self.failing_side_writes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` subscribe calls fail with a network error
    pub fn fail_next_subscribes(&self, count: usize) {
        self.failing_subscribes.store(count, Ordering::SeqCst);
    }

    /// Insert a message row directly, without a notification
    pub fn seed_message(&self, message: Message) {
        let mut tables = lock(&self.tables);
        tables.last_timestamp = tables.last_timestamp.max(Some(message.created_at));
        tables.messages.insert(message.id, message);
    }

    /// Insert a profile row directly, without a notification
    pub fn seed_profile(&self, profile: Profile) {
        lock(&self.tables).profiles.insert(profile.id, profile);
    }

    pub fn profile(&self, id: Uuid) -> Option<Profile> {
        lock(&self.tables).profiles.get(&id).cloned()
    }

    pub fn message(&self, id: Uuid) -> Option<Message> {
        lock(&self.tables).messages.get(&id).cloned()
    }

    /// All message rows, oldest first
    pub fn messages(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = lock(&self.tables).messages.values().cloned().collect();
        messages.sort_by_key(|m| m.sort_key());
        messages
    }

    pub fn typing(&self, user_id: Uuid, chat_with_id: Uuid) -> Option<TypingIndicator> {
        lock(&self.tables).typing.get(&(user_id, chat_with_id)).cloned()
    }

    /// Every write accepted so far, in order
    pub fn writes(&self) -> Vec<WriteOp> {
        lock(&self.writes).clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    fn record(&self, op: WriteOp) {
        lock(&self.writes).push(op);
    }

    fn check_fetch(&self, operation: &str) -> BackendResult<()> {
        if take_failure(&self.failing_fetches) {
            return Err(BackendError::network(format!("{}: injected failure", operation)));
        }
        Ok(())
    }

    fn check_write(&self, operation: &str) -> BackendResult<()> {
        if take_failure(&self.failing_writes) {
            return Err(BackendError::network(format!("{}: injected failure", operation)));
        }
        Ok(())
    }

    fn check_side_write(&self, operation: &str) -> BackendResult<()> {
        if take_failure(&self.failing_side_writes) {
            return Err(BackendError::network(format!("{}: injected failure", operation)));
        }
        Ok(())
    }
}

/// One client's connection to a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryBackend {
    store: Arc<MemoryStore>,
    session: RwLock<Option<Session>>,
}

impl MemoryBackend {
    pub fn connect(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            session: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn caller(&self) -> BackendResult<Uuid> {
        self.session()
            .map(|s| s.user.id)
            .ok_or(BackendError::Unauthenticated)
    }

    fn set_session(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(|p| p.into_inner()) = session;
    }

    fn visible_messages<F>(&self, caller: Uuid, predicate: F) -> Vec<Message>
    where
        F: Fn(&Message) -> bool,
    {
        let tables = lock(&self.store.tables);
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.sender_id == caller || m.receiver_id == caller)
            .filter(|m| predicate(m))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.sort_key());
        messages
    }

    fn subscribe<T: BusRecord>(&self, filter: ChangeFilter) -> BackendResult<Subscription<T>> {
        self.caller()?;
        if take_failure(&self.store.failing_subscribes) {
            return Err(BackendError::network(format!(
                "subscribe {}: injected failure",
                T::TABLE.as_str()
            )));
        }
        let label = format!("{}:{:?}", T::TABLE.as_str(), filter);
        Ok(self.store.bus.subscribe(filter, label))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> BackendResult<AuthUser> {
        let mut tables = lock(&self.store.tables);
        if tables.accounts.contains_key(email) {
            return Err(BackendError::conflict("email already registered"));
        }
        if tables.profiles.values().any(|p| p.username == username) {
            return Err(BackendError::conflict("username already taken"));
        }

        let account = Account {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let mut profile = Profile::new(account.id, username);
        let now = tables.next_timestamp();
        profile.created_at = now;
        profile.updated_at = now;
        profile.last_seen = now;

        tables.accounts.insert(email.to_string(), account.clone());
        tables.profiles.insert(profile.id, profile.clone());
        self.store.bus.publish(ChangeEvent::Insert(profile));
        drop(tables);

        self.store.record(WriteOp::SignUp {
            user_id: account.id,
            username: username.to_string(),
        });
        Ok(AuthUser {
            id: account.id,
            email: Some(account.email),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let account = lock(&self.store.tables)
            .accounts
            .get(email)
            .filter(|a| a.password == password)
            .cloned()
            .ok_or(BackendError::Unauthenticated)?;
        let session = Session {
            access_token: format!("memory-{}", Uuid::new_v4()),
            refresh_token: None,
            user: AuthUser {
                id: account.id,
                email: Some(account.email),
            },
        };
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.set_session(None);
        Ok(())
    }

    async fn current_user(&self) -> BackendResult<Option<AuthUser>> {
        Ok(self.session().map(|s| s.user))
    }

    fn session(&self) -> Option<Session> {
        self.session.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    async fn fetch_profiles(&self, exclude: Uuid) -> BackendResult<Vec<Profile>> {
        self.caller()?;
        self.store.check_fetch("fetch profiles")?;
        let mut profiles: Vec<Profile> = lock(&self.store.tables)
            .profiles
            .values()
            .filter(|p| p.id != exclude)
            .cloned()
            .collect();
        profiles.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(profiles)
    }

    async fn fetch_profile(&self, id: Uuid) -> BackendResult<Profile> {
        self.caller()?;
        self.store.check_fetch("fetch profile")?;
        lock(&self.store.tables)
            .profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(format!("profile {}", id)))
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> BackendResult<Profile> {
        if self.caller()? != id {
            return Err(BackendError::forbidden("profiles may only be updated by their owner"));
        }
        self.store.check_side_write("update profile")?;
        let mut tables = lock(&self.store.tables);
        if let Some(username) = &update.username {
            if tables.profiles.values().any(|p| p.id != id && &p.username == username) {
                return Err(BackendError::conflict("username already taken"));
            }
        }
        let now = tables.next_timestamp();
        let profile = tables
            .profiles
            .get_mut(&id)
            .ok_or_else(|| BackendError::not_found(format!("profile {}", id)))?;
        profile.apply(update);
        profile.updated_at = now;
        let profile = profile.clone();
        self.store.bus.publish(ChangeEvent::Update(profile.clone()));
        drop(tables);

        self.store.record(WriteOp::UpdateProfile {
            id,
            update: update.clone(),
        });
        Ok(profile)
    }

    async fn fetch_conversation(&self, key: ConversationKey) -> BackendResult<Vec<Message>> {
        let caller = self.caller()?;
        self.store.check_fetch("fetch conversation")?;
        Ok(self.visible_messages(caller, |m| m.belongs_to(&key)))
    }

    async fn fetch_messages_involving(&self, user_id: Uuid) -> BackendResult<Vec<Message>> {
        let caller = self.caller()?;
        self.store.check_fetch("fetch messages")?;
        Ok(self.visible_messages(caller, |m| m.sender_id == user_id || m.receiver_id == user_id))
    }

    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message> {
        if self.caller()? != message.sender_id {
            return Err(BackendError::forbidden("messages may only be sent as yourself"));
        }
        self.store.check_write("insert message")?;
        let mut tables = lock(&self.store.tables);
        let now = tables.next_timestamp();
        let row = Message {
            id: Uuid::new_v4(),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content.clone(),
            is_read: false,
            created_at: now,
            updated_at: now,
        };
        tables.messages.insert(row.id, row.clone());
        self.store.bus.publish(ChangeEvent::Insert(row.clone()));
        drop(tables);

        self.store.record(WriteOp::InsertMessage(row.clone()));
        Ok(row)
    }

    async fn mark_message_read(&self, id: Uuid) -> BackendResult<()> {
        let caller = self.caller()?;
        self.store.check_write("mark read")?;
        let mut tables = lock(&self.store.tables);
        let now = tables.next_timestamp();
        let Some(message) = tables.messages.get_mut(&id) else {
            return Ok(());
        };
        if message.receiver_id != caller {
            return Err(BackendError::forbidden("only the receiver may mark a message read"));
        }
        if message.is_read {
            return Ok(());
        }
        message.is_read = true;
        message.updated_at = now;
        let row = message.clone();
        self.store.bus.publish(ChangeEvent::Update(row));
        drop(tables);

        self.store.record(WriteOp::MarkRead(id));
        Ok(())
    }

    async fn delete_message(&self, id: Uuid) -> BackendResult<()> {
        let caller = self.caller()?;
        self.store.check_write("delete message")?;
        let mut tables = lock(&self.store.tables);
        match tables.messages.get(&id) {
            None => return Ok(()),
            Some(message) if message.sender_id != caller => {
                return Err(BackendError::forbidden("only the sender may delete a message"));
            }
            Some(_) => {}
        }
        if let Some(row) = tables.messages.remove(&id) {
            self.store.bus.publish(ChangeEvent::deleted(row));
        }
        drop(tables);

        self.store.record(WriteOp::DeleteMessage(id));
        Ok(())
    }

    async fn upsert_typing(&self, update: &TypingUpdate) -> BackendResult<()> {
        if self.caller()? != update.user_id {
            return Err(BackendError::forbidden("typing rows may only be written by their owner"));
        }
        self.store.check_side_write("upsert typing")?;
        let mut tables = lock(&self.store.tables);
        let key = (update.user_id, update.chat_with_id);
        let event = match tables.typing.get_mut(&key) {
            Some(row) => {
                row.is_typing = update.is_typing;
                row.updated_at = update.updated_at;
                ChangeEvent::Update(row.clone())
            }
            None => {
                let row = TypingIndicator {
                    id: Uuid::new_v4(),
                    user_id: update.user_id,
                    chat_with_id: update.chat_with_id,
                    is_typing: update.is_typing,
                    updated_at: update.updated_at,
                };
                tables.typing.insert(key, row.clone());
                ChangeEvent::Insert(row)
            }
        };
        self.store.bus.publish(event);
        drop(tables);

        self.store.record(WriteOp::UpsertTyping(update.clone()));
        Ok(())
    }

    async fn subscribe_messages(&self, filter: ChangeFilter) -> BackendResult<Subscription<Message>> {
        self.subscribe(filter)
    }

    async fn subscribe_profiles(&self, filter: ChangeFilter) -> BackendResult<Subscription<Profile>> {
        self.subscribe(filter)
    }

    async fn subscribe_typing(&self, filter: ChangeFilter) -> BackendResult<Subscription<TypingIndicator>> {
        self.subscribe(filter)
    }
}
