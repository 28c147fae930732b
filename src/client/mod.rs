//! Client Module
//!
//! `ChatClient` is the one handle an application holds. It is created
//! explicitly, signs a user in and out, and owns at most one roster task and
//! one conversation task at a time.
//!
//! # Module Structure
//!
//! ```text
//! client/
//! ├── mod.rs       - ChatClient
//! ├── auth.rs      - AuthState, sign-up form validation
//! ├── config.rs    - File + environment configuration loading
//! ├── error.rs     - ClientError
//! ├── logging.rs   - tracing-subscriber setup (feature `logging`)
//! ├── roster.rs    - Presence roster
//! └── messaging/   - Conversation synchronizer, typing, background task
//! ```
//!
//! # Presence
//!
//! Presence is written at the edges of a session only: `sign_in` sets the
//! profile `online`, `sign_out` sets it `offline` with `last_seen`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{AuthUser, Backend, BackendError, BackendResult, HttpBackend};
use crate::shared::config::AppConfig;
use crate::shared::messaging::{
    summarize, ConversationSummary, PresenceStatus, Profile, ProfileUpdate,
};

pub mod auth;
pub mod config;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod messaging;
pub mod roster;

pub use auth::{AuthState, SignUpForm};
pub use error::{ClientError, ClientResult};
pub use messaging::{ConversationHandle, ConversationView, SyncState};
pub use roster::{RosterHandle, RosterState, RosterView};

use messaging::{spawn_conversation, ConversationSynchronizer};
use roster::{spawn_roster, Roster};

/// Bound a backend call by `duration`
pub(crate) async fn with_timeout<T, F>(duration: Duration, operation: &str, call: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(duration, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::timeout(operation)),
    }
}

struct ActiveConversation {
    peer_id: Uuid,
    handle: ConversationHandle,
    task: JoinHandle<()>,
}

struct ActiveRoster {
    handle: RosterHandle,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Tasks {
    conversation: Option<ActiveConversation>,
    roster: Option<ActiveRoster>,
}

/// Entry point for an embedding application
pub struct ChatClient {
    backend: Arc<dyn Backend>,
    config: AppConfig,
    auth: RwLock<AuthState>,
    tasks: Mutex<Tasks>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("backend_url", &self.config.backend_url)
            .finish()
    }
}

impl ChatClient {
    pub fn new(backend: Arc<dyn Backend>, config: AppConfig) -> Self {
        Self {
            backend,
            config,
            auth: RwLock::new(AuthState::SignedOut),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    /// Client over HTTP to `config.backend_url`
    pub fn connect(config: AppConfig) -> ClientResult<Self> {
        let backend = HttpBackend::new(config.clone())?;
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn auth_state(&self) -> AuthState {
        self.auth.read().await.clone()
    }

    /// Local user's profile, if signed in
    pub async fn profile(&self) -> Option<Profile> {
        self.auth.read().await.profile().cloned()
    }

    async fn local_id(&self) -> ClientResult<Uuid> {
        self.profile()
            .await
            .map(|p| p.id)
            .ok_or(ClientError::NotSignedIn)
    }

    /// Validate the form, then register. Does not sign in.
    pub async fn sign_up(&self, form: &SignUpForm) -> ClientResult<AuthUser> {
        let username = form.validate()?;
        let user = with_timeout(
            self.config.request_timeout,
            "sign up",
            self.backend.sign_up(form.email.trim(), &form.password, &username),
        )
        .await
        .map_err(|e| {
            tracing::error!("[AUTH] Sign-up failed: {}", e);
            e
        })?;
        tracing::info!("[AUTH] Account created for {}", username);
        Ok(user)
    }

    /// Sign in and mark the profile online.
    ///
    /// A failed presence write is logged; the session stands. Without a
    /// readable profile the backend session is ended and the error returned.
    pub async fn sign_in(&self, email: &str, password: &str) -> ClientResult<Profile> {
        let timeout = self.config.request_timeout;
        let session = with_timeout(timeout, "sign in", self.backend.sign_in(email.trim(), password))
            .await
            .map_err(|e| {
                tracing::warn!("[AUTH] Sign-in failed: {}", e);
                e
            })?;
        let user = session.user;

        let presence = with_timeout(
            timeout,
            "set presence",
            self.backend
                .update_profile(user.id, &ProfileUpdate::presence(PresenceStatus::Online)),
        )
        .await;
        let profile = match presence {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("[AUTH] Could not mark {} online: {}", user.id, e);
                let fetched =
                    with_timeout(timeout, "fetch profile", self.backend.fetch_profile(user.id)).await;
                match fetched {
                    Ok(profile) => profile,
                    Err(e) => {
                        tracing::error!("[AUTH] No profile for {}, ending session: {}", user.id, e);
                        if let Err(sign_out) = self.backend.sign_out().await {
                            tracing::warn!("[AUTH] Sign-out after failed sign-in: {}", sign_out);
                        }
                        return Err(e.into());
                    }
                }
            }
        };

        tracing::info!("[AUTH] Signed in as {} ({})", profile.username, user.id);
        *self.auth.write().await = AuthState::SignedIn {
            user,
            profile: profile.clone(),
        };
        Ok(profile)
    }

    /// Close the conversation and roster, mark the profile offline, end the session
    pub async fn sign_out(&self) -> ClientResult<()> {
        self.close_conversation().await;
        self.close_roster().await;

        let state = std::mem::take(&mut *self.auth.write().await);
        let AuthState::SignedIn { user, .. } = state else {
            return Ok(());
        };

        let offline = with_timeout(
            self.config.request_timeout,
            "set presence",
            self.backend
                .update_profile(user.id, &ProfileUpdate::presence(PresenceStatus::Offline)),
        )
        .await;
        if let Err(e) = offline {
            tracing::warn!("[AUTH] Could not mark {} offline: {}", user.id, e);
        }

        with_timeout(self.config.request_timeout, "sign out", self.backend.sign_out()).await?;
        tracing::info!("[AUTH] Signed out {}", user.id);
        Ok(())
    }

    /// Rename the local user
    pub async fn update_username(&self, raw: &str) -> ClientResult<Profile> {
        let update = ProfileUpdate::username(raw)?;
        let local_id = self.local_id().await?;
        let profile = with_timeout(
            self.config.request_timeout,
            "update profile",
            self.backend.update_profile(local_id, &update),
        )
        .await?;

        let mut auth = self.auth.write().await;
        if let AuthState::SignedIn { profile: current, .. } = &mut *auth {
            *current = profile.clone();
        }
        tracing::info!("[AUTH] Username changed to {}", profile.username);
        Ok(profile)
    }

    /// Start (or restart) the roster task
    pub async fn open_roster(&self) -> ClientResult<RosterHandle> {
        let local_id = self.local_id().await?;
        self.close_roster().await;

        let roster = Roster::new(self.backend.clone(), self.config.clone(), local_id);
        let (handle, task) = spawn_roster(roster);
        self.tasks.lock().await.roster = Some(ActiveRoster {
            handle: handle.clone(),
            task,
        });
        Ok(handle)
    }

    pub async fn close_roster(&self) {
        let active = self.tasks.lock().await.roster.take();
        if let Some(active) = active {
            if let Err(e) = active.handle.close().await {
                tracing::debug!("[ROSTER] Close: {}", e);
            }
            let _ = active.task.await;
        }
    }

    /// Open the conversation with `peer_id`, closing the previous one first.
    ///
    /// Fails if the peer has no profile.
    pub async fn open_conversation(&self, peer_id: Uuid) -> ClientResult<ConversationHandle> {
        let local_id = self.local_id().await?;
        self.close_conversation().await;

        let peer = with_timeout(
            self.config.request_timeout,
            "fetch profile",
            self.backend.fetch_profile(peer_id),
        )
        .await?;

        let sync = ConversationSynchronizer::new(
            self.backend.clone(),
            self.config.clone(),
            local_id,
            peer_id,
        )
        .with_peer(peer);
        let (handle, task) = spawn_conversation(sync);
        self.tasks.lock().await.conversation = Some(ActiveConversation {
            peer_id,
            handle: handle.clone(),
            task,
        });
        Ok(handle)
    }

    /// Peer of the open conversation, if any
    pub async fn active_peer(&self) -> Option<Uuid> {
        self.tasks
            .lock()
            .await
            .conversation
            .as_ref()
            .map(|c| c.peer_id)
    }

    /// Tear the open conversation down and wait for its task to finish
    pub async fn close_conversation(&self) {
        let active = self.tasks.lock().await.conversation.take();
        if let Some(active) = active {
            if let Err(e) = active.handle.close().await {
                tracing::warn!("[SYNC] Error while closing conversation with {}: {}", active.peer_id, e);
            }
            let _ = active.task.await;
        }
    }

    /// One summary per other user: last message and unread count
    pub async fn conversation_summaries(&self) -> ClientResult<Vec<ConversationSummary>> {
        let local_id = self.local_id().await?;
        let timeout = self.config.request_timeout;
        let mut peers =
            with_timeout(timeout, "fetch profiles", self.backend.fetch_profiles(local_id)).await?;
        roster::sort_profiles(&mut peers);
        let messages = with_timeout(
            timeout,
            "fetch messages",
            self.backend.fetch_messages_involving(local_id),
        )
        .await?;
        Ok(summarize(local_id, &peers, &messages))
    }
}
