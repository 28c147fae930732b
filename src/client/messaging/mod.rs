//! Conversation Synchronization
//!
//! # Module Structure
//!
//! ```text
//! messaging/
//! ├── mod.rs      - Module exports
//! ├── timeline.rs - Ordered message list and merge rules
//! ├── sync.rs     - ConversationSynchronizer (load, merge, writes)
//! ├── typing.rs   - Compose transitions and peer typing expiry
//! └── handle.rs   - Background task and ConversationHandle
//! ```

pub mod handle;
pub mod sync;
pub mod timeline;
pub mod typing;

pub use handle::{spawn_conversation, ConversationHandle};
pub use sync::{ConversationSynchronizer, ConversationView, Incoming, SyncState};
pub use timeline::{IgnoreReason, MergeOutcome, MessageTimeline};
pub use typing::{ComposeTracker, PeerTyping};
