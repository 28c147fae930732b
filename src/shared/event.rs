/**
 * Change Notification Types
 *
 * This module defines the typed change notifications delivered by the
 * backend's realtime bus: which table a row lives in, what happened to it
 * (insert, update or delete), which rows a subscription is scoped to, and
 * the wire payload carried on the stream.
 */
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

use crate::shared::error::SharedError;
use crate::shared::messaging::{ConversationKey, Message, Profile, TypingIndicator};

/// Backend tables the client reads and watches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Messages,
    TypingIndicators,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Messages => "messages",
            Table::TypingIndicators => "typing_indicators",
        }
    }
}

/// A row type stored in one of the watched tables
pub trait Record: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;

    fn id(&self) -> Uuid;

    /// Last modification time; used for last-write-wins merging
    fn updated_at(&self) -> DateTime<Utc>;

    /// Value of a filterable column, as the string the backend compares against
    fn column(&self, name: &str) -> Option<String>;
}

impl Record for Message {
    const TABLE: Table = Table::Messages;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn column(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.id.to_string()),
            "sender_id" => Some(self.sender_id.to_string()),
            "receiver_id" => Some(self.receiver_id.to_string()),
            "is_read" => Some(self.is_read.to_string()),
            _ => None,
        }
    }
}

impl Record for Profile {
    const TABLE: Table = Table::Profiles;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn column(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.id.to_string()),
            "username" => Some(self.username.clone()),
            "status" => Some(self.status.as_str().to_string()),
            _ => None,
        }
    }
}

impl Record for TypingIndicator {
    const TABLE: Table = Table::TypingIndicators;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn column(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.id.to_string()),
            "user_id" => Some(self.user_id.to_string()),
            "chat_with_id" => Some(self.chat_with_id.to_string()),
            _ => None,
        }
    }
}

/// Kind of row change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A typed row change
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    /// Deletes always carry the id; the old row only if the backend sent it
    Delete { id: Uuid, old: Option<T> },
}

impl<T: Record> ChangeEvent<T> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Id of the affected row
    pub fn row_id(&self) -> Uuid {
        match self {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) => row.id(),
            ChangeEvent::Delete { id, .. } => *id,
        }
    }

    /// Row the filter is evaluated against; `None` for a bare delete
    pub fn row(&self) -> Option<&T> {
        match self {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) => Some(row),
            ChangeEvent::Delete { old, .. } => old.as_ref(),
        }
    }

    /// Delete notification for a full row
    pub fn deleted(row: T) -> Self {
        ChangeEvent::Delete {
            id: row.id(),
            old: Some(row),
        }
    }
}

/// Server-side scope of a subscription or query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFilter {
    /// Every row of the table
    All,
    /// Rows whose `column` equals `value`
    Eq { column: &'static str, value: String },
    /// Messages exchanged between the two participants, in either direction
    Conversation(ConversationKey),
}

impl ChangeFilter {
    pub fn eq(column: &'static str, value: impl ToString) -> Self {
        ChangeFilter::Eq {
            column,
            value: value.to_string(),
        }
    }

    /// Whether a row is inside the filter
    pub fn matches<T: Record>(&self, row: &T) -> bool {
        match self {
            ChangeFilter::All => true,
            ChangeFilter::Eq { column, value } => row.column(column).as_deref() == Some(value),
            ChangeFilter::Conversation(key) => {
                let sender = row.column("sender_id").and_then(|s| s.parse().ok());
                let receiver = row.column("receiver_id").and_then(|s| s.parse().ok());
                match (sender, receiver) {
                    (Some(sender), Some(receiver)) => key.matches(sender, receiver),
                    _ => false,
                }
            }
        }
    }

    /// Whether a change notification should be delivered. A delete without
    /// its old row cannot be evaluated and is delivered; the consumer ignores
    /// ids it does not hold.
    pub fn admits<T: Record>(&self, event: &ChangeEvent<T>) -> bool {
        match event.row() {
            Some(row) => self.matches(row),
            None => true,
        }
    }

    /// Query-string pair for PostgREST-style filters, `None` for [`ChangeFilter::All`]
    pub fn to_query(&self) -> Option<(String, String)> {
        match self {
            ChangeFilter::All => None,
            ChangeFilter::Eq { column, value } => Some((column.to_string(), format!("eq.{}", value))),
            ChangeFilter::Conversation(key) => {
                let (a, b) = key.participants();
                Some((
                    "or".to_string(),
                    format!(
                        "(and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a}))"
                    ),
                ))
            }
        }
    }
}

/// Wire format of one change notification on the realtime stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangePayload {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub table: Table,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangePayload {
    /// Encode a typed change for the wire
    pub fn from_event<T: Record>(event: &ChangeEvent<T>) -> Result<Self, SharedError> {
        let (record, old_record) = match event {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) => {
                (Some(serde_json::to_value(row)?), None)
            }
            ChangeEvent::Delete { id, old } => {
                let old = match old {
                    Some(row) => serde_json::to_value(row)?,
                    None => serde_json::json!({ "id": id }),
                };
                (None, Some(old))
            }
        };
        Ok(Self {
            kind: event.kind(),
            table: T::TABLE,
            record,
            old_record,
            commit_timestamp: Some(Utc::now()),
        })
    }

    /// Decode into a typed change for table `T`
    pub fn into_event<T: Record>(self) -> Result<ChangeEvent<T>, SharedError> {
        if self.table != T::TABLE {
            return Err(SharedError::serialization(format!(
                "change for table '{}' delivered to '{}' subscription",
                self.table.as_str(),
                T::TABLE.as_str()
            )));
        }
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let record = self
                    .record
                    .ok_or_else(|| SharedError::serialization("change payload without record"))?;
                let row: T = serde_json::from_value(record)?;
                Ok(if self.kind == ChangeKind::Insert {
                    ChangeEvent::Insert(row)
                } else {
                    ChangeEvent::Update(row)
                })
            }
            ChangeKind::Delete => {
                let old = self
                    .old_record
                    .ok_or_else(|| SharedError::serialization("delete payload without old_record"))?;
                let id = old
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| SharedError::serialization("delete payload without id"))?;
                // Partial old rows (id only) are expected; keep the full row when present.
                let old = serde_json::from_value::<T>(old).ok();
                Ok(ChangeEvent::Delete { id, old })
            }
        }
    }
}

/// Connection state of a realtime subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Connecting,
    Connected,
    Retrying,
    Error(String),
    /// The stream came back after a drop; notifications may have been missed
    Resubscribed,
    /// The stream ended and will not reconnect
    Closed,
}

/// Item yielded by a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent<T> {
    Change(ChangeEvent<T>),
    Status(SubscriptionStatus),
}
