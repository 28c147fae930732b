// Increase recursion limit for complex async operations
#![recursion_limit = "256"]

//! Shadowchat - Direct Messaging Client Library
//!
//! Shadowchat is the client side of a one-to-one messaging application whose
//! persistence, authentication and change notifications live in a hosted
//! backend. The crate keeps a live, ordered, deduplicated view of each
//! conversation, a presence roster, and typing indicators in both directions.
//!
//! # Module Structure
//!
//! - **`shared`** - Row types, change-notification model, configuration, validation errors
//! - **`backend`** - The `Backend` trait and its two transports
//!   - `HttpBackend`: REST + server-sent events against the hosted service
//!   - `MemoryBackend`: in-process store with the same authorization rules
//! - **`client`** - `ChatClient`, the conversation synchronizer, the roster and typing logic
//!
//! # Usage
//!
//! ```rust,no_run
//! use shadowchat::client::ChatClient;
//! use shadowchat::shared::AppConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::builder()
//!     .backend_url("https://chat.example.com")
//!     .anon_key("public-anon-key")
//!     .build()?;
//! let client = ChatClient::connect(config)?;
//!
//! let me = client.sign_in("neo@example.com", "secret").await?;
//! let roster = client.open_roster().await?;
//! let peer = roster.view().profiles[0].id;
//!
//! let conversation = client.open_conversation(peer).await?;
//! conversation.send("hello").await?;
//! println!("{} messages", conversation.view().messages.len());
//!
//! client.sign_out().await?;
//! # let _ = me;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`logging`** - `client::logging::init()` with `tracing-subscriber` and `.env` loading
//!
//! # Consistency
//!
//! Change notifications may arrive late, twice, or out of order. Merging is
//! order-independent: messages are deduplicated by id, updates are
//! last-write-wins on `updated_at`, `is_read` never reverts, and deleted ids
//! are remembered so they cannot be resurrected. A reconnected subscription
//! triggers a full reload.

/// Shared types and data structures
pub mod shared;

/// Backend trait and transports
pub mod backend;

/// Client state: sign-in, roster, conversations
pub mod client;
