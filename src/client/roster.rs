//! Presence Roster
//!
//! Every other user's profile, online first. The roster does not merge
//! profile notifications: any change, or a reconnect of the profile stream,
//! triggers a full re-fetch.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{Backend, Subscription};
use crate::client::error::{ClientError, ClientResult};
use crate::client::with_timeout;
use crate::shared::config::AppConfig;
use crate::shared::event::{ChangeFilter, SubscriptionEvent, SubscriptionStatus};
use crate::shared::messaging::Profile;

const ROSTER_COMMAND_BUFFER: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RosterState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RosterView {
    pub state: RosterState,
    pub profiles: Vec<Profile>,
}

/// Online, then away, then offline; username within each group
pub fn sort_profiles(profiles: &mut [Profile]) {
    profiles.sort_by(|a, b| {
        a.status
            .rank()
            .cmp(&b.status.rank())
            .then_with(|| a.username.cmp(&b.username))
    });
}

pub struct Roster {
    backend: Arc<dyn Backend>,
    config: AppConfig,
    local_id: Uuid,
    state: RosterState,
    profiles: Vec<Profile>,
    subscription: Option<Subscription<Profile>>,
}

impl Roster {
    pub fn new(backend: Arc<dyn Backend>, config: AppConfig, local_id: Uuid) -> Self {
        Self {
            backend,
            config,
            local_id,
            state: RosterState::Uninitialized,
            profiles: Vec::new(),
            subscription: None,
        }
    }

    pub fn state(&self) -> &RosterState {
        &self.state
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    /// Subscribe to profile changes, then fetch
    pub async fn open(&mut self) -> ClientResult<()> {
        let subscription = self.backend.subscribe_profiles(ChangeFilter::All).await?;
        self.subscription = Some(subscription);
        self.refresh().await
    }

    /// Re-fetch every profile except the local user's
    pub async fn refresh(&mut self) -> ClientResult<()> {
        self.state = RosterState::Loading;
        let result = with_timeout(
            self.config.request_timeout,
            "fetch profiles",
            self.backend.fetch_profiles(self.local_id),
        )
        .await;
        match result {
            Ok(mut profiles) => {
                sort_profiles(&mut profiles);
                tracing::debug!("[ROSTER] Loaded {} profiles", profiles.len());
                self.profiles = profiles;
                self.state = RosterState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::error!("[ROSTER] Failed to load profiles: {}", e);
                self.state = RosterState::Failed(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Cancel safe; `None` once the stream has ended
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent<Profile>> {
        match &mut self.subscription {
            Some(sub) => sub.next().await,
            None => None,
        }
    }

    pub async fn process(&mut self, event: SubscriptionEvent<Profile>) {
        match event {
            SubscriptionEvent::Change(change) => {
                tracing::debug!("[ROSTER] Profile {:?} {}, refreshing", change.kind(), change.row_id());
                let _ = self.refresh().await;
            }
            SubscriptionEvent::Status(SubscriptionStatus::Resubscribed) => {
                tracing::info!("[ROSTER] Profile stream reconnected, refreshing");
                let _ = self.refresh().await;
            }
            SubscriptionEvent::Status(SubscriptionStatus::Closed) => {
                tracing::warn!("[ROSTER] Profile stream closed");
                self.subscription = None;
            }
            SubscriptionEvent::Status(_) => {}
        }
    }

    pub fn snapshot(&self) -> RosterView {
        RosterView {
            state: self.state.clone(),
            profiles: self.profiles.clone(),
        }
    }

    pub fn close(mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        tracing::info!("[ROSTER] Closed");
    }
}

#[derive(Debug)]
enum RosterCommand {
    Retry(oneshot::Sender<ClientResult<()>>),
    Close(oneshot::Sender<()>),
}

/// Cloneable handle to the running roster task
#[derive(Debug, Clone)]
pub struct RosterHandle {
    commands: mpsc::Sender<RosterCommand>,
    view: watch::Receiver<RosterView>,
}

/// Start the roster task; it subscribes and fetches right away
pub fn spawn_roster(roster: Roster) -> (RosterHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(ROSTER_COMMAND_BUFFER);
    let (view_tx, view_rx) = watch::channel(roster.snapshot());
    let task = tokio::spawn(run(roster, commands_rx, view_tx));
    (
        RosterHandle {
            commands: commands_tx,
            view: view_rx,
        },
        task,
    )
}

async fn run(
    mut roster: Roster,
    mut commands: mpsc::Receiver<RosterCommand>,
    view: watch::Sender<RosterView>,
) {
    let _ = roster.open().await;
    view.send_replace(roster.snapshot());

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(RosterCommand::Retry(reply)) => {
                    let _ = reply.send(roster.refresh().await);
                }
                Some(RosterCommand::Close(reply)) => {
                    roster.close();
                    let _ = reply.send(());
                    return;
                }
                None => {
                    roster.close();
                    return;
                }
            },
            Some(event) = roster.next_event() => {
                roster.process(event).await;
            }
        }
        let next = roster.snapshot();
        view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl RosterHandle {
    pub fn view(&self) -> RosterView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<RosterView> {
        self.view.clone()
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> ClientResult<RosterView>
    where
        F: FnMut(&RosterView) -> bool,
    {
        let mut view = self.view.clone();
        loop {
            {
                let current = view.borrow_and_update();
                if predicate(&current) {
                    return Ok(current.clone());
                }
            }
            view.changed().await.map_err(|_| ClientError::Closed("roster"))?;
        }
    }

    pub async fn retry(&self) -> ClientResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(RosterCommand::Retry(reply_tx))
            .await
            .map_err(|_| ClientError::Closed("roster"))?;
        reply_rx.await.map_err(|_| ClientError::Closed("roster"))?
    }

    pub async fn close(&self) -> ClientResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(RosterCommand::Close(reply_tx))
            .await
            .map_err(|_| ClientError::Closed("roster"))?;
        reply_rx.await.map_err(|_| ClientError::Closed("roster"))
    }
}
