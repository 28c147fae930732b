//! Backend Error Module
//!
//! Errors raised while talking to the hosted backend, whichever transport
//! carries the call.
//!
//! # Module Structure
//!
//! ```text
//! error/
//! ├── mod.rs        - Module exports and documentation
//! ├── types.rs      - Error type definitions
//! └── conversion.rs - Conversions from transport errors and HTTP statuses
//! ```
//!
//! # Error Types
//!
//! - `Network` / `Timeout` - The request never produced a response
//! - `Http` - Any unexpected status, with the response body
//! - `Unauthenticated` / `Forbidden` - No session, or row-level security refused the write
//! - `NotFound` / `Conflict` - Missing row, or a unique constraint (username) was hit
//! - `SubscriptionClosed` - A realtime stream ended and will not come back
//! - `SharedError` / `SerializationError` - Payload problems

/// Error type definitions
pub mod types;

/// Conversions from reqwest errors and HTTP status codes
pub mod conversion;

// Re-export commonly used types
pub use types::{BackendError, BackendResult};
