//! Messaging Module
//!
//! Row types of the three backend tables plus the conversation helpers built
//! on top of them:
//!
//! - `Profile` - A user's public profile and presence
//! - `Message` - A direct message between two users
//! - `TypingIndicator` - Whether a user is typing to another user
//! - `ConversationKey` / `ConversationSummary` - Conversation identity and roster context
//!
//! # Usage
//!
//! ```rust
//! use shadowchat::shared::messaging::{ConversationKey, Message, Profile, TypingIndicator};
//! ```

pub mod conversation;
pub mod message;
pub mod profile;
pub mod typing;

// Re-export all types
pub use conversation::{summarize, ConversationKey, ConversationSummary};
pub use message::{normalize_content, MarkRead, Message, NewMessage};
pub use profile::{validate_username, PresenceStatus, Profile, ProfileUpdate, MIN_USERNAME_LEN};
pub use typing::{TypingIndicator, TypingUpdate};
