/**
 * In-Process Change Bus
 *
 * Fans row changes out to every subscriber of a table using
 * `tokio::sync::broadcast`, one channel per table. Each subscription gets a
 * forwarding task that applies the subscription's `ChangeFilter` and turns
 * the broadcast stream into a `Subscription<T>`.
 *
 * # Link State
 *
 * The bus can be taken offline to model a dropped realtime connection.
 * While offline, published changes are lost (exactly what a subscriber
 * would miss during a real outage) and subscribers see `Retrying`; coming
 * back online reports `Resubscribed`. A subscriber that falls behind the
 * channel capacity is told `Resubscribed` as well, since it has missed
 * changes.
 */

use super::subscription::{Subscription, SUBSCRIPTION_BUFFER};
use crate::shared::event::{ChangeEvent, ChangeFilter, Record, SubscriptionEvent, SubscriptionStatus};
use crate::shared::messaging::{Message, Profile, TypingIndicator};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};

/// Per-table broadcast capacity
pub const BUS_CAPACITY: usize = 1000;

/// Broadcast sender for one table
pub type ChangeBroadcast<T> = broadcast::Sender<ChangeEvent<T>>;

/// Connectivity transitions of the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Up,
}

/// Change channels for every watched table
#[derive(Debug)]
pub struct ChangeBus {
    profiles: ChangeBroadcast<Profile>,
    messages: ChangeBroadcast<Message>,
    typing: ChangeBroadcast<TypingIndicator>,
    link: broadcast::Sender<LinkState>,
    online: AtomicBool,
}

/// A record type with a channel on the bus
pub trait BusRecord: Record {
    fn channel(bus: &ChangeBus) -> &ChangeBroadcast<Self>;
}

impl BusRecord for Profile {
    fn channel(bus: &ChangeBus) -> &ChangeBroadcast<Self> {
        &bus.profiles
    }
}

impl BusRecord for Message {
    fn channel(bus: &ChangeBus) -> &ChangeBroadcast<Self> {
        &bus.messages
    }
}

impl BusRecord for TypingIndicator {
    fn channel(bus: &ChangeBus) -> &ChangeBroadcast<Self> {
        &bus.typing
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        let (profiles, _) = broadcast::channel(BUS_CAPACITY);
        let (messages, _) = broadcast::channel(BUS_CAPACITY);
        let (typing, _) = broadcast::channel(BUS_CAPACITY);
        let (link, _) = broadcast::channel(16);
        Self {
            profiles,
            messages,
            typing,
            link,
            online: AtomicBool::new(true),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Take the bus offline or bring it back, notifying every subscriber
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        let state = if online { LinkState::Up } else { LinkState::Down };
        tracing::info!("[REALTIME] Change bus link {:?}", state);
        let _ = self.link.send(state);
    }

    /// Broadcast a change to all subscribers of its table
    ///
    /// # Returns
    ///
    /// Number of subscribers that received the change (0 if none or offline)
    pub fn publish<T: BusRecord>(&self, event: ChangeEvent<T>) -> usize {
        if !self.is_online() {
            tracing::debug!(
                "[REALTIME] Bus offline, dropping {:?} on {}",
                event.kind(),
                T::TABLE.as_str()
            );
            return 0;
        }
        match T::channel(self).send(event) {
            Ok(subscriber_count) => {
                tracing::debug!(
                    "[REALTIME] Change on {} delivered to {} subscribers",
                    T::TABLE.as_str(),
                    subscriber_count
                );
                subscriber_count
            }
            Err(_) => {
                tracing::debug!("[REALTIME] No subscribers on {}", T::TABLE.as_str());
                0
            }
        }
    }

    /// Open a filtered subscription on `T`'s table
    pub fn subscribe<T: BusRecord>(&self, filter: ChangeFilter, label: String) -> Subscription<T> {
        let changes = T::channel(self).subscribe();
        let link = self.link.subscribe();
        let online = self.is_online();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task_label = label.clone();
        let task = tokio::spawn(async move {
            forward(changes, link, online, filter, task_label, tx).await;
        });
        Subscription::new(label, rx, task)
    }
}

async fn forward<T: Record>(
    mut changes: broadcast::Receiver<ChangeEvent<T>>,
    mut link: broadcast::Receiver<LinkState>,
    online: bool,
    filter: ChangeFilter,
    label: String,
    tx: mpsc::Sender<SubscriptionEvent<T>>,
) {
    let initial = if online {
        SubscriptionStatus::Connected
    } else {
        SubscriptionStatus::Retrying
    };
    if tx.send(SubscriptionEvent::Status(initial)).await.is_err() {
        return;
    }

    loop {
        let item = tokio::select! {
            biased;
            state = link.recv() => match state {
                Ok(LinkState::Down) => SubscriptionEvent::Status(SubscriptionStatus::Retrying),
                Ok(LinkState::Up) => SubscriptionEvent::Status(SubscriptionStatus::Resubscribed),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    SubscriptionEvent::Status(SubscriptionStatus::Resubscribed)
                }
                Err(broadcast::error::RecvError::Closed) => {
                    SubscriptionEvent::Status(SubscriptionStatus::Closed)
                }
            },
            change = changes.recv() => match change {
                Ok(event) => {
                    if !filter.admits(&event) {
                        continue;
                    }
                    SubscriptionEvent::Change(event)
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("[REALTIME] {} lagged, {} changes skipped", label, skipped);
                    SubscriptionEvent::Status(SubscriptionStatus::Resubscribed)
                }
                Err(broadcast::error::RecvError::Closed) => {
                    SubscriptionEvent::Status(SubscriptionStatus::Closed)
                }
            },
        };

        let closing = matches!(item, SubscriptionEvent::Status(SubscriptionStatus::Closed));
        if tx.send(item).await.is_err() || closing {
            tracing::debug!("[REALTIME] Forwarder for {} stopped", label);
            return;
        }
    }
}
