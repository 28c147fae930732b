//! Realtime Change Streams
//!
//! Client-side plumbing for change notifications.
//!
//! - **`subscription`** - `Subscription<T>` and the server-sent-event reader
//!   used by the HTTP backend, with reconnect and backoff
//! - **`broadcast`** - in-process `ChangeBus` used by the memory backend
//!
//! Both transports yield the same `SubscriptionEvent<T>` items, so consumers
//! never know which one they are attached to.

/// In-process change fan-out
pub mod broadcast;

/// Subscription handle and SSE reader
pub mod subscription;

pub use broadcast::{BusRecord, ChangeBus, LinkState};
pub use subscription::{spawn_sse_subscription, Backoff, LineBuffer, Subscription};
