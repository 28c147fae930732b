//! Shared Module
//!
//! Types used by both the backend transports and the client layer: the
//! table rows, the change-notification model, configuration and the
//! validation errors raised before anything reaches the network.
//!
//! # Overview
//!
//! Everything here is plain data plus pure functions. Rows serialize to the
//! exact JSON shape the hosted backend stores.

/// Change notification types
pub mod event;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Profiles, messages, typing rows and conversations
pub mod messaging;

/// Re-export commonly used types for convenience
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use error::SharedError;
pub use event::{
    ChangeEvent, ChangeFilter, ChangeKind, ChangePayload, Record, SubscriptionEvent,
    SubscriptionStatus, Table,
};
pub use messaging::{
    ConversationKey, ConversationSummary, Message, NewMessage, PresenceStatus, Profile,
    ProfileUpdate, TypingIndicator, TypingUpdate,
};
