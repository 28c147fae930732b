//! Integration tests
//!
//! Conversation, roster and client flows over the in-memory backend, and
//! the HTTP transport against a mock server.

pub mod client_test;
pub mod handle_test;
pub mod http_test;
pub mod realtime_test;
