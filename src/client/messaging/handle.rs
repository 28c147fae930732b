//! Background conversation task
//!
//! `spawn_conversation` moves a `ConversationSynchronizer` into its own tokio
//! task. The task is the only owner of the message list: user actions reach
//! it as commands over an mpsc channel, and every change is published as a
//! fresh `ConversationView` on a watch channel.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::sync::{ConversationSynchronizer, ConversationView, SyncState};
use crate::client::error::{ClientError, ClientResult};
use crate::shared::messaging::Message;

/// How often typing staleness is re-evaluated
const TICK_INTERVAL: Duration = Duration::from_secs(1);

const COMMAND_BUFFER: usize = 64;

#[derive(Debug)]
enum Command {
    Send {
        content: String,
        reply: oneshot::Sender<ClientResult<Option<Message>>>,
    },
    MarkRead {
        id: Uuid,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Delete {
        id: Uuid,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Compose {
        text: String,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Blur {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Retry {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Close {
        reply: oneshot::Sender<ClientResult<()>>,
    },
}

/// Cloneable handle to a running conversation
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<ConversationView>,
}

/// Start the conversation task; it subscribes and loads right away
pub fn spawn_conversation(sync: ConversationSynchronizer) -> (ConversationHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (view_tx, view_rx) = watch::channel(sync.snapshot());
    let task = tokio::spawn(run(sync, commands_rx, view_tx));
    (
        ConversationHandle {
            commands: commands_tx,
            view: view_rx,
        },
        task,
    )
}

fn publish(sync: &ConversationSynchronizer, view: &watch::Sender<ConversationView>) {
    let next = sync.snapshot();
    view.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

async fn run(
    mut sync: ConversationSynchronizer,
    mut commands: mpsc::Receiver<Command>,
    view: watch::Sender<ConversationView>,
) {
    // Failure is kept in the state and shown through the view.
    let _ = sync.open().await;
    publish(&sync, &view);

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    tracing::debug!("[SYNC] All conversation handles dropped, closing");
                    if let Err(e) = sync.close().await {
                        tracing::warn!("[SYNC] Error while closing conversation: {}", e);
                    }
                    return;
                };
                match command {
                    Command::Send { content, reply } => {
                        let _ = reply.send(sync.send(&content).await);
                    }
                    Command::MarkRead { id, reply } => {
                        let _ = reply.send(sync.mark_as_read(id).await);
                    }
                    Command::Delete { id, reply } => {
                        let _ = reply.send(sync.delete_message(id).await);
                    }
                    Command::Compose { text, reply } => {
                        let _ = reply.send(sync.compose_changed(&text).await);
                    }
                    Command::Blur { reply } => {
                        let _ = reply.send(sync.compose_blurred().await);
                    }
                    Command::Retry { reply } => {
                        let _ = reply.send(sync.retry().await);
                    }
                    Command::Close { reply } => {
                        let result = sync.close().await;
                        let _ = reply.send(result);
                        return;
                    }
                }
            }
            Some(incoming) = sync.next_incoming() => {
                sync.process(incoming).await;
            }
            _ = tick.tick() => {}
        }
        publish(&sync, &view);
    }
}

impl ConversationHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<ClientResult<T>>) -> Command,
    ) -> ClientResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| ClientError::Closed("conversation"))?;
        reply_rx.await.map_err(|_| ClientError::Closed("conversation"))?
    }

    /// Latest snapshot
    pub fn view(&self) -> ConversationView {
        self.view.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn watch(&self) -> watch::Receiver<ConversationView> {
        self.view.clone()
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> ClientResult<ConversationView>
    where
        F: FnMut(&ConversationView) -> bool,
    {
        let mut view = self.view.clone();
        loop {
            {
                let current = view.borrow_and_update();
                if predicate(&current) {
                    return Ok(current.clone());
                }
            }
            view.changed()
                .await
                .map_err(|_| ClientError::Closed("conversation"))?;
        }
    }

    /// Wait for the first load to finish, successfully or not
    pub async fn ready(&self) -> ClientResult<SyncState> {
        self.wait_for(|v| v.state.is_settled()).await.map(|v| v.state)
    }

    pub async fn send(&self, content: impl Into<String>) -> ClientResult<Option<Message>> {
        let content = content.into();
        self.request(|reply| Command::Send { content, reply }).await
    }

    pub async fn mark_as_read(&self, id: Uuid) -> ClientResult<()> {
        self.request(|reply| Command::MarkRead { id, reply }).await
    }

    pub async fn delete_message(&self, id: Uuid) -> ClientResult<()> {
        self.request(|reply| Command::Delete { id, reply }).await
    }

    pub async fn compose_changed(&self, text: impl Into<String>) -> ClientResult<()> {
        let text = text.into();
        self.request(|reply| Command::Compose { text, reply }).await
    }

    pub async fn compose_blurred(&self) -> ClientResult<()> {
        self.request(|reply| Command::Blur { reply }).await
    }

    pub async fn retry(&self) -> ClientResult<()> {
        self.request(|reply| Command::Retry { reply }).await
    }

    /// Stop the task: unsubscribe and clear the typing row
    pub async fn close(&self) -> ClientResult<()> {
        self.request(|reply| Command::Close { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
