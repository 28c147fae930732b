//! User Profile Data Structure
//!
//! Represents a row of the `profiles` table and the presence status shown to
//! other users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::SharedError;

/// Minimum username length accepted at sign-up and in settings
pub const MIN_USERNAME_LEN: usize = 3;

/// Presence status of a user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    #[default]
    Offline,
}

impl PresenceStatus {
    /// Roster position; lower sorts first
    pub fn rank(self) -> u8 {
        match self {
            PresenceStatus::Online => 0,
            PresenceStatus::Away => 1,
            PresenceStatus::Offline => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
        }
    }
}

/// A user's public profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    /// Unique display name
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Profile created alongside a new account
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            username: username.into(),
            avatar_url: None,
            status: PresenceStatus::Offline,
            last_seen: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }

    /// "Online" or "Last seen: ..." as shown next to the username
    pub fn presence_label(&self) -> String {
        if self.is_online() {
            "Online".to_string()
        } else {
            format!("Last seen: {}", self.last_seen.format("%Y-%m-%d %H:%M"))
        }
    }

    /// Get avatar initial (first letter of username)
    pub fn avatar_initial(&self) -> char {
        self.username.chars().next().unwrap_or('?').to_ascii_uppercase()
    }

    /// Apply a partial update the way the backend would
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(username) = &update.username {
            self.username = username.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(last_seen) = update.last_seen {
            self.last_seen = last_seen;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of a profile row
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PresenceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl ProfileUpdate {
    /// Rename, validating the new username
    pub fn username(raw: &str) -> Result<Self, SharedError> {
        Ok(Self {
            username: Some(validate_username(raw)?),
            ..Self::default()
        })
    }

    /// Presence transition, stamping `last_seen`
    pub fn presence(status: PresenceStatus) -> Self {
        Self {
            status: Some(status),
            last_seen: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.status.is_none() && self.last_seen.is_none()
    }
}

/// Trim and length-check a username
pub fn validate_username(raw: &str) -> Result<String, SharedError> {
    let username = raw.trim();
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(SharedError::validation(
            "username",
            format!("Username must be at least {} characters", MIN_USERNAME_LEN),
        ));
    }
    Ok(username.to_string())
}
